#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use target_monitor::config::{Config, PriceSourceKind};
use target_monitor::core::network_health::ReachabilityProbe;
use target_monitor::core::retry::RetryPolicy;
use target_monitor::core::scheduler::{AlwaysRun, SuspensionGate};
use target_monitor::feeds::{FeedHandle, LiveFeedSource};
use target_monitor::models::{
    CheckUpdate, Direction, NewAnalysis, RecordId, Target, Timeframe, TradeRecord, ValidatedAnalysis,
};
use target_monitor::monitor::{EngineParts, Evaluation, MonitorEngine};
use target_monitor::remote::{CheckSummary, MarketStatus, MarketStatusSource, TargetChecker};
use target_monitor::store::{JsonFileStore, ResultSink, WriteOutcome};

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn test_config() -> Config {
    Config {
        symbol: "XAUUSD".to_string(),
        analysis_duration_hours: 8,
        fallback_price: 2600.0,
        price_source: PriceSourceKind::Live,
        chart_frame_path: String::new(),
        chart_frame_width: 0,
        chart_frame_height: 0,
        chart_reference_price: None,
        price_poll_secs: 5,
        target_check_secs: 30,
        market_status_secs: 300,
        network_check_secs: 30,
        market_cache_ttl_secs: 300,
        probe_url: "http://localhost:9/".to_string(),
        probe_timeout_secs: 1,
        api_base_url: String::new(),
        api_key: String::new(),
        api_secret: String::new(),
        records_file: String::new(),
        log_level: "INFO".to_string(),
    }
}

/// The gold analysis used throughout: long from 2615.43, targets 2620/2630,
/// stop 2600.
pub fn gold_long() -> NewAnalysis {
    NewAnalysis {
        symbol: "XAUUSD".to_string(),
        timeframe: "1h".to_string(),
        direction: Direction::Bullish,
        entry_price: 2615.43,
        targets: vec![Target::at(2620.0), Target::at(2630.0)],
        stop_loss: 2600.0,
        duration_hours: None,
    }
}

pub fn gold_long_record(id: &str, created_at: DateTime<Utc>) -> TradeRecord {
    gold_long()
        .validate(8)
        .unwrap()
        .into_record(id.to_string(), created_at)
}

pub fn record(direction: Direction, entry: f64, targets: &[f64], stop_loss: f64) -> TradeRecord {
    TradeRecord {
        direction,
        entry_price: entry,
        targets: targets.iter().map(|&p| Target::at(p)).collect(),
        stop_loss,
        timeframe: Timeframe::M15,
        ..gold_long_record("r-1", t0())
    }
}

pub struct StubMarket {
    open: AtomicBool,
    calls: AtomicUsize,
}

impl StubMarket {
    pub fn new(open: bool) -> Self {
        Self {
            open: AtomicBool::new(open),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketStatusSource for StubMarket {
    async fn check_market_status(&self, _symbol: Option<&str>) -> Result<MarketStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MarketStatus {
            is_open: self.open.load(Ordering::SeqCst),
            timestamp: Utc::now().to_rfc3339(),
        })
    }
}

pub struct StubProbe {
    reachable: AtomicBool,
}

impl StubProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for StubProbe {
    async fn probe(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("probe timed out"))
        }
    }
}

/// Remote checker that fails a set number of times before succeeding.
pub struct FlakyChecker {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyChecker {
    pub fn new(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetChecker for FlakyChecker {
    async fn check_analysis_targets(&self, _force_check: bool) -> Result<CheckSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(anyhow!("502 Bad Gateway"));
        }
        Ok(CheckSummary {
            checked: 2,
            updated: 1,
        })
    }
}

/// In-memory store whose next `save_check` calls fail on demand.
pub struct FlakySink {
    pub store: JsonFileStore,
    failing_writes: AtomicUsize,
    failed: AtomicUsize,
}

impl FlakySink {
    pub fn new() -> Self {
        Self {
            store: JsonFileStore::in_memory(),
            failing_writes: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultSink for FlakySink {
    async fn create(&self, analysis: ValidatedAnalysis) -> Result<TradeRecord> {
        self.store.create(analysis).await
    }

    async fn open_records(&self) -> Result<Vec<TradeRecord>> {
        self.store.open_records().await
    }

    async fn records_by_ids(&self, ids: &[RecordId]) -> Result<Vec<TradeRecord>> {
        self.store.records_by_ids(ids).await
    }

    async fn save_check(&self, id: &RecordId, update: &CheckUpdate) -> Result<WriteOutcome> {
        let left = self.failing_writes.load(Ordering::SeqCst);
        if left > 0 {
            self.failing_writes.store(left - 1, Ordering::SeqCst);
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(anyhow!("disk full"));
        }
        self.store.save_check(id, update).await
    }
}

pub struct Harness {
    pub engine: MonitorEngine,
    pub store: Arc<JsonFileStore>,
    pub feed: FeedHandle,
    pub market: Arc<StubMarket>,
}

pub async fn harness(market_open: bool) -> Harness {
    harness_with(market_open, Evaluation::Local, Arc::new(AlwaysRun)).await
}

pub async fn harness_with(
    market_open: bool,
    evaluation: Evaluation,
    gate: Arc<dyn SuspensionGate>,
) -> Harness {
    let store = Arc::new(JsonFileStore::in_memory());
    let market = Arc::new(StubMarket::new(market_open));
    let (prices, feed) = LiveFeedSource::new();

    let parts = EngineParts {
        store: store.clone(),
        market_source: market.clone(),
        probe: Arc::new(StubProbe::new(true)),
        prices: Box::new(prices),
        evaluation,
        gate,
        retry_policy: RetryPolicy::NextTick,
    };
    let engine = MonitorEngine::new(test_config().shared(), parts).await;

    Harness {
        engine,
        store,
        feed,
        market,
    }
}

/// Pushes a price and runs one price poll followed by one target check.
pub async fn tick(h: &Harness, price: f64) -> Option<CheckSummary> {
    assert!(h.feed.push(price));
    h.engine.run_price_tick().await.unwrap();
    h.engine.run_target_check(false).await.unwrap()
}
