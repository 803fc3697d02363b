//! Composition root: wires the pollers, gates and collaborators together.
//!
//! Pollers never call into each other. The price poller publishes
//! `price-update`, the network poller publishes connectivity transitions, and
//! one listener task turns `manual-check-requested` and connectivity recovery
//! into manual triggers on the relevant pollers.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SharedConfig;
use crate::core::market_calendar::MarketCalendar;
use crate::core::network_health::{ConnectivityStatus, NetworkHealthMonitor, ReachabilityProbe};
use crate::core::retry::{Attempt, RetryController, RetryPolicy, RetryState};
use crate::core::scheduler::{PollOptions, PollScheduler, PollState, PollTask, SuspensionGate};
use crate::events::{DomainEvent, EventBus};
use crate::feeds::PriceSource;
use crate::models::{NewAnalysis, TradeRecord};
use crate::remote::{CheckSummary, LocalAnalysisService, MarketStatusSource, TargetChecker};
use crate::store::ResultSink;

/// Where open records get evaluated.
pub enum Evaluation {
    /// In-process, against the engine's own `price-update` events.
    Local,
    /// Delegated to a remote analysis service.
    Remote(Arc<dyn TargetChecker>),
}

/// Collaborators the engine is built from.
pub struct EngineParts {
    pub store: Arc<dyn ResultSink>,
    pub market_source: Arc<dyn MarketStatusSource>,
    pub probe: Arc<dyn ReachabilityProbe>,
    pub prices: Box<dyn PriceSource>,
    pub evaluation: Evaluation,
    pub gate: Arc<dyn SuspensionGate>,
    pub retry_policy: RetryPolicy,
}

struct PriceTick {
    symbol: String,
    source: Mutex<Box<dyn PriceSource>>,
    calendar: Arc<MarketCalendar>,
    bus: EventBus,
}

impl PriceTick {
    async fn read(&self) -> Result<Option<f64>> {
        let price = {
            let mut source = self.source.lock().await;
            let name = source.name();
            source
                .latest_price()
                .await
                .with_context(|| format!("{} price source failed", name))?
        };

        let Some(price) = price else {
            debug!("No {} price available yet", self.symbol);
            return Ok(None);
        };

        let is_market_open = self.calendar.cached(&self.symbol).await;
        self.bus.publish(DomainEvent::PriceUpdate {
            symbol: self.symbol.clone(),
            price,
            is_market_open,
        });
        Ok(Some(price))
    }
}

#[async_trait]
impl PollTask for PriceTick {
    async fn run(&self) -> Result<()> {
        self.read().await.map(|_| ())
    }
}

struct TargetTick {
    checker: Arc<dyn TargetChecker>,
    retry: Arc<RetryController>,
    network: Arc<NetworkHealthMonitor>,
    bus: EventBus,
    force_next: AtomicBool,
}

impl TargetTick {
    async fn check(&self, force: bool) -> Result<Option<CheckSummary>> {
        let network = self.network.current();
        if network.is_offline() {
            debug!("Offline, skipping target check");
            return Ok(None);
        }

        let attempt = self
            .retry
            .execute("check-analysis-targets", network, || {
                self.checker.check_analysis_targets(force)
            })
            .await;

        match attempt {
            Attempt::Succeeded(summary) => {
                debug!(
                    "Target check: {} checked, {} updated (force={})",
                    summary.checked, summary.updated, force
                );
                if summary.updated > 0 {
                    info!("{} of {} analyses resolved", summary.updated, summary.checked);
                    self.bus.publish(DomainEvent::HistoryUpdated {
                        timestamp: Utc::now(),
                    });
                }
                Ok(Some(summary))
            }
            Attempt::Failed(failure) => Err(anyhow!(failure.error_message)),
            Attempt::Deferred => {
                debug!("Target check deferred by backoff");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl PollTask for TargetTick {
    async fn run(&self) -> Result<()> {
        let force = self.force_next.swap(false, Ordering::SeqCst);
        self.check(force).await.map(|_| ())
    }
}

struct MarketTick {
    symbol: String,
    calendar: Arc<MarketCalendar>,
    network: Arc<NetworkHealthMonitor>,
    bus: EventBus,
    last: Mutex<Option<bool>>,
}

#[async_trait]
impl PollTask for MarketTick {
    async fn run(&self) -> Result<()> {
        if self.network.current().is_offline() {
            debug!("Offline, keeping cached market status");
            return Ok(());
        }

        self.calendar.invalidate(&self.symbol).await;
        let open = self.calendar.is_open(&self.symbol).await;

        let mut last = self.last.lock().await;
        if *last != Some(open) {
            info!(
                "{} market is {}",
                self.symbol,
                if open { "open" } else { "closed" }
            );
            *last = Some(open);
            self.bus.publish(DomainEvent::MarketStatusChanged {
                symbol: self.symbol.clone(),
                is_open: open,
            });
        }
        Ok(())
    }
}

struct NetworkTick {
    network: Arc<NetworkHealthMonitor>,
}

#[async_trait]
impl PollTask for NetworkTick {
    async fn run(&self) -> Result<()> {
        self.network.recheck().await;
        Ok(())
    }
}

pub struct MonitorEngine {
    config: SharedConfig,
    bus: EventBus,
    store: Arc<dyn ResultSink>,
    network: Arc<NetworkHealthMonitor>,
    retry: Arc<RetryController>,

    price_tick: Arc<PriceTick>,
    target_tick: Arc<TargetTick>,
    market_tick: Arc<MarketTick>,
    network_tick: Arc<NetworkTick>,

    price_poller: PollScheduler,
    target_poller: PollScheduler,
    market_poller: PollScheduler,
    network_poller: PollScheduler,
    listener: Option<JoinHandle<()>>,
}

impl MonitorEngine {
    pub async fn new(config: SharedConfig, parts: EngineParts) -> Self {
        let cfg = config.read().await.clone();
        let bus = EventBus::default();

        let calendar = Arc::new(MarketCalendar::new(parts.market_source, cfg.market_cache_ttl()));
        let network = Arc::new(NetworkHealthMonitor::new(parts.probe, bus.clone()));
        let retry = Arc::new(RetryController::new(bus.clone(), parts.retry_policy));

        let (checker, mode): (Arc<dyn TargetChecker>, String) = match parts.evaluation {
            Evaluation::Local => (
                Arc::new(LocalAnalysisService::new(
                    parts.store.clone(),
                    calendar.clone(),
                    &bus,
                )) as Arc<dyn TargetChecker>,
                "in-process".to_string(),
            ),
            Evaluation::Remote(checker) => (checker, format!("remote {}", cfg.api_base_url)),
        };

        info!("{}", "=".repeat(60));
        info!("Target monitor starting up");
        info!("Symbol: {}", cfg.symbol);
        info!("Evaluation: {}", mode.trim_end());
        info!(
            "Cadence: price {}s, targets {}s, market {}s, network {}s",
            cfg.price_poll_secs, cfg.target_check_secs, cfg.market_status_secs, cfg.network_check_secs
        );
        info!("{}", "=".repeat(60));

        let price_tick = Arc::new(PriceTick {
            symbol: cfg.symbol.clone(),
            source: Mutex::new(parts.prices),
            calendar: calendar.clone(),
            bus: bus.clone(),
        });
        let target_tick = Arc::new(TargetTick {
            checker,
            retry: retry.clone(),
            network: network.clone(),
            bus: bus.clone(),
            force_next: AtomicBool::new(false),
        });
        let market_tick = Arc::new(MarketTick {
            symbol: cfg.symbol.clone(),
            calendar,
            network: network.clone(),
            bus: bus.clone(),
            last: Mutex::new(None),
        });
        let network_tick = Arc::new(NetworkTick {
            network: network.clone(),
        });

        Self {
            config,
            bus,
            store: parts.store,
            network,
            retry,
            price_tick,
            target_tick,
            market_tick,
            network_tick,
            price_poller: PollScheduler::new("price", parts.gate.clone()),
            target_poller: PollScheduler::new("target-check", parts.gate.clone()),
            market_poller: PollScheduler::new("market-status", parts.gate.clone()),
            network_poller: PollScheduler::new("network-health", parts.gate),
            listener: None,
        }
    }

    /// Arms all four pollers and the trigger listener. Restarting re-arms them.
    pub async fn start(&mut self) {
        self.stop();
        let cfg = self.config.read().await.clone();
        let options = PollOptions::default();

        self.listener = Some(self.spawn_listener());
        self.network_poller
            .start(self.network_tick.clone(), cfg.network_check_interval(), options);
        self.market_poller
            .start(self.market_tick.clone(), cfg.market_status_interval(), options);
        self.price_poller
            .start(self.price_tick.clone(), cfg.price_poll_interval(), options);
        self.target_poller
            .start(self.target_tick.clone(), cfg.target_check_interval(), options);

        info!("Monitor running");
    }

    /// Cancels every poller and the listener. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let was_running = self.is_running();
        self.price_poller.stop();
        self.target_poller.stop();
        self.market_poller.stop();
        self.network_poller.stop();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if was_running {
            info!("Monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_some()
    }

    /// Re-reads poll cadences from the shared config and re-arms running
    /// pollers whose interval changed.
    pub async fn apply_config(&mut self) {
        let cfg = self.config.read().await.clone();
        let wanted = [
            (&mut self.price_poller, cfg.price_poll_interval()),
            (&mut self.target_poller, cfg.target_check_interval()),
            (&mut self.market_poller, cfg.market_status_interval()),
            (&mut self.network_poller, cfg.network_check_interval()),
        ];
        for (poller, interval) in wanted {
            if poller.is_active() && poller.state().interval != interval {
                info!("{} poller now every {:?}", poller.name(), interval);
                poller.set_interval(interval);
            }
        }
    }

    fn spawn_listener(&self) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let target_tick = self.target_tick.clone();
        let target = self.target_poller.trigger_handle();
        let market = self.market_poller.trigger_handle();
        let price = self.price_poller.trigger_handle();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(DomainEvent::ManualCheckRequested) => {
                        info!("Manual target check requested");
                        target_tick.force_next.store(true, Ordering::SeqCst);
                        target.fire();
                    }
                    Ok(DomainEvent::NetworkStatusChanged { previous, current })
                        if ConnectivityStatus::is_recovery(previous, current) =>
                    {
                        info!("Connectivity restored ({}), rechecking now", current);
                        price.fire();
                        market.fire();
                        target.fire();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => debug!("Listener skipped {} event(s)", n),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Validates and stores a new analysis. Validation failures come back as
    /// `ValidationError` and nothing is written.
    pub async fn submit_analysis(&self, draft: NewAnalysis) -> Result<TradeRecord> {
        let default_hours = self.config.read().await.analysis_duration_hours;
        let analysis = draft.validate(default_hours)?;
        let record = self.store.create(analysis).await?;
        info!(
            "Tracking {} {} {} @ {:.2} until {}",
            record.id,
            record.symbol,
            record.direction,
            record.entry_price,
            record.expires_at.format("%Y-%m-%d %H:%M UTC")
        );
        Ok(record)
    }

    pub fn request_manual_check(&self) {
        self.bus.publish(DomainEvent::ManualCheckRequested);
    }

    /// One price poll outside the scheduler. Publishes `price-update` when a
    /// price is available.
    pub async fn run_price_tick(&self) -> Result<Option<f64>> {
        self.price_tick.read().await
    }

    /// One target check outside the scheduler. `None` means the check was
    /// skipped (offline) or deferred by backoff.
    pub async fn run_target_check(&self, force: bool) -> Result<Option<CheckSummary>> {
        self.target_tick.check(force).await
    }

    /// Host connectivity change.
    pub async fn on_connectivity_event(&self, online: bool) -> ConnectivityStatus {
        self.network.on_os_event(online).await
    }

    pub fn network_status(&self) -> ConnectivityStatus {
        self.network.current()
    }

    pub async fn retry_state(&self) -> RetryState {
        self.retry.state().await
    }

    pub fn poll_states(&self) -> Vec<(String, PollState)> {
        [
            &self.price_poller,
            &self.target_poller,
            &self.market_poller,
            &self.network_poller,
        ]
        .iter()
        .map(|p| (p.name().to_string(), p.state()))
        .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

impl Drop for MonitorEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
