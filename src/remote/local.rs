use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::market_calendar::MarketCalendar;
use crate::core::target_evaluator;
use crate::events::{DomainEvent, EventBus};
use crate::models::{CheckUpdate, Direction, Outcome, Resolution, TradeRecord};
use crate::remote::{CheckSummary, TargetChecker};
use crate::store::{ResultSink, WriteOutcome};

/// Latest price per symbol, fed from `price-update` events.
struct PriceBook {
    rx: broadcast::Receiver<DomainEvent>,
    latest: HashMap<String, f64>,
}

impl PriceBook {
    fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(DomainEvent::PriceUpdate { symbol, price, .. }) => {
                    self.latest.insert(symbol.to_uppercase(), price);
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(n)) => debug!("Price book skipped {} event(s)", n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
}

/// In-process evaluation of every open record against the latest prices.
pub struct LocalAnalysisService {
    store: Arc<dyn ResultSink>,
    calendar: Arc<MarketCalendar>,
    bus: EventBus,
    prices: Mutex<PriceBook>,
}

impl LocalAnalysisService {
    pub fn new(store: Arc<dyn ResultSink>, calendar: Arc<MarketCalendar>, bus: &EventBus) -> Self {
        Self {
            store,
            calendar,
            bus: bus.clone(),
            prices: Mutex::new(PriceBook {
                rx: bus.subscribe(),
                latest: HashMap::new(),
            }),
        }
    }

    /// Latest price seen for `symbol`, after taking in pending events.
    pub async fn latest_price(&self, symbol: &str) -> Option<f64> {
        let mut book = self.prices.lock().await;
        book.drain();
        book.latest.get(&symbol.to_uppercase()).copied()
    }

    /// One evaluation pass as of `now`.
    pub async fn check_at(&self, force_check: bool, now: DateTime<Utc>) -> Result<CheckSummary> {
        let prices = {
            let mut book = self.prices.lock().await;
            book.drain();
            book.latest.clone()
        };

        let records = self
            .store
            .open_records()
            .await
            .context("Failed to load open analyses")?;

        let mut summary = CheckSummary::default();
        let mut market_open: HashMap<String, bool> = HashMap::new();
        let mut failed_writes = 0usize;
        let mut first_error = None;

        for record in records {
            summary.checked += 1;

            let Some(update) = self
                .next_update(&record, &prices, &mut market_open, force_check, now)
                .await
            else {
                continue;
            };

            match self.store.save_check(&record.id, &update).await {
                Ok(WriteOutcome::Applied) => {
                    if let Some(resolution) = update.resolution {
                        summary.updated += 1;
                        self.announce(&record, resolution);
                    }
                }
                Ok(WriteOutcome::Unchanged) => {}
                Err(e) => {
                    warn!("Saving check for {} failed: {:#}", record.id, e);
                    failed_writes += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e.context(format!(
                "{} of {} outcome write(s) failed",
                failed_writes, summary.checked
            )));
        }
        Ok(summary)
    }

    async fn next_update(
        &self,
        record: &TradeRecord,
        prices: &HashMap<String, f64>,
        market_open: &mut HashMap<String, bool>,
        force_check: bool,
        now: DateTime<Utc>,
    ) -> Option<CheckUpdate> {
        if record.is_expired_at(now) {
            return Some(CheckUpdate {
                checked_at: now,
                price: None,
                resolution: Some(Resolution::Expired { at: now }),
            });
        }

        if record.direction == Direction::Neutral || now < record.created_at {
            return None;
        }

        if !force_check {
            let open = match market_open.get(&record.symbol) {
                Some(&open) => open,
                None => {
                    let open = self.calendar.is_open(&record.symbol).await;
                    market_open.insert(record.symbol.clone(), open);
                    open
                }
            };
            if !open {
                debug!("{} market closed, skipping {}", record.symbol, record.id);
                return None;
            }
        }

        let Some(&price) = prices.get(&record.symbol.to_uppercase()) else {
            debug!("No price for {} yet, skipping {}", record.symbol, record.id);
            return None;
        };

        let outcome = target_evaluator::evaluate(record, price);
        Some(CheckUpdate {
            checked_at: now,
            price: Some(price),
            resolution: Resolution::from_outcome(outcome, now),
        })
    }

    fn announce(&self, record: &TradeRecord, resolution: Resolution) {
        let outcome = match resolution {
            Resolution::TargetHit { index, .. } => Outcome::TargetHit(index),
            Resolution::StopLossHit { .. } => Outcome::StopLossHit,
            Resolution::Expired { .. } => {
                info!("{} {} expired without a hit", record.id, record.symbol);
                return;
            }
        };
        info!("{} {} {}: {}", record.id, record.symbol, record.direction, outcome);
        self.bus.publish(DomainEvent::OutcomeRecorded {
            record_id: record.id.clone(),
            outcome,
        });
    }
}

#[async_trait]
impl TargetChecker for LocalAnalysisService {
    async fn check_analysis_targets(&self, force_check: bool) -> Result<CheckSummary> {
        self.check_at(force_check, Utc::now()).await
    }
}
