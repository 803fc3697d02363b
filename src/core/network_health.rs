use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::events::{DomainEvent, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    Online,
    Limited,
    Offline,
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityStatus::Online => write!(f, "online"),
            ConnectivityStatus::Limited => write!(f, "limited"),
            ConnectivityStatus::Offline => write!(f, "offline"),
        }
    }
}

impl ConnectivityStatus {
    pub fn is_offline(&self) -> bool {
        matches!(self, ConnectivityStatus::Offline)
    }

    /// Transition that should trigger an immediate recheck of gated pollers.
    pub fn is_recovery(previous: ConnectivityStatus, current: ConnectivityStatus) -> bool {
        previous.is_offline() && !current.is_offline()
    }
}

/// Lightweight check that the wider internet is reachable.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

/// Unauthenticated HEAD request to a well-known endpoint. Any HTTP response
/// counts as reachable.
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build probe client")?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> Result<()> {
        let resp = self
            .client
            .head(&self.url)
            .send()
            .await
            .with_context(|| format!("Probe to {} failed", self.url))?;
        debug!("Probe {} -> {}", self.url, resp.status());
        Ok(())
    }
}

/// Tri-state connectivity classifier.
///
/// The host reports link state through `set_os_online`/`on_os_event`; when
/// the link is up a reachability probe distinguishes `Online` from `Limited`.
pub struct NetworkHealthMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    os_online: AtomicBool,
    status: watch::Sender<ConnectivityStatus>,
    bus: EventBus,
    check_lock: Mutex<()>,
}

impl NetworkHealthMonitor {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, bus: EventBus) -> Self {
        let (status, _) = watch::channel(ConnectivityStatus::Online);
        Self {
            probe,
            os_online: AtomicBool::new(true),
            status,
            bus,
            check_lock: Mutex::new(()),
        }
    }

    pub fn current(&self) -> ConnectivityStatus {
        *self.status.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectivityStatus> {
        self.status.subscribe()
    }

    pub fn set_os_online(&self, online: bool) {
        self.os_online.store(online, Ordering::SeqCst);
    }

    /// Host connectivity change: record it and reclassify straight away.
    pub async fn on_os_event(&self, online: bool) -> ConnectivityStatus {
        self.set_os_online(online);
        self.recheck().await
    }

    pub async fn recheck(&self) -> ConnectivityStatus {
        let _guard = self.check_lock.lock().await;

        let next = if !self.os_online.load(Ordering::SeqCst) {
            ConnectivityStatus::Offline
        } else {
            match self.probe.probe().await {
                Ok(()) => ConnectivityStatus::Online,
                Err(e) => {
                    debug!("Reachability probe failed: {:#}", e);
                    ConnectivityStatus::Limited
                }
            }
        };

        let previous = self.status.send_replace(next);
        if previous != next {
            info!("Network status: {} -> {}", previous, next);
            self.bus.publish(DomainEvent::NetworkStatusChanged {
                previous,
                current: next,
            });
        }
        next
    }
}
