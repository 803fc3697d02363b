//! In-process domain event bus.
//!
//! Owned by the composition root. Components publish typed events and
//! observers hold their own receiver; dropping the receiver unsubscribes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::core::network_health::ConnectivityStatus;
use crate::models::{Outcome, RecordId};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DomainEvent {
    #[serde(rename_all = "camelCase")]
    PriceUpdate {
        symbol: String,
        price: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_market_open: Option<bool>,
    },
    ManualCheckRequested,
    CheckFailed {
        error: String,
    },
    HistoryUpdated {
        timestamp: DateTime<Utc>,
    },
    NetworkStatusChanged {
        previous: ConnectivityStatus,
        current: ConnectivityStatus,
    },
    #[serde(rename_all = "camelCase")]
    MarketStatusChanged {
        symbol: String,
        is_open: bool,
    },
    #[serde(rename_all = "camelCase")]
    OutcomeRecorded {
        record_id: RecordId,
        outcome: Outcome,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::PriceUpdate { .. } => "price-update",
            DomainEvent::ManualCheckRequested => "manual-check-requested",
            DomainEvent::CheckFailed { .. } => "check-failed",
            DomainEvent::HistoryUpdated { .. } => "history-updated",
            DomainEvent::NetworkStatusChanged { .. } => "network-status-changed",
            DomainEvent::MarketStatusChanged { .. } => "market-status-changed",
            DomainEvent::OutcomeRecorded { .. } => "outcome-recorded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Publishes to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: DomainEvent) -> usize {
        let name = event.name();
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                debug!("No subscribers for {}", name);
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
