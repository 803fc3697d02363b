use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::{Config, PriceSourceKind};
use crate::core::network_health::ReachabilityProbe;
use crate::core::scheduler::PollTask;
use crate::models::{Direction, NewAnalysis, Target, Timeframe, TradeRecord, ValidatedAnalysis};
use crate::remote::{MarketStatus, MarketStatusSource};

/// Fixed reference instant, a Monday during market hours.
pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn bullish_record() -> TradeRecord {
    TradeRecord {
        id: "a-1".to_string(),
        symbol: "XAUUSD".to_string(),
        timeframe: Timeframe::H1,
        direction: Direction::Bullish,
        entry_price: 2615.43,
        targets: vec![Target::at(2620.0), Target::at(2630.0)],
        stop_loss: 2600.0,
        created_at: t0(),
        expires_at: t0() + Duration::hours(8),
        last_checked_at: None,
        last_checked_price: None,
        target_hit: false,
        target_index: None,
        stop_loss_hit: false,
        expired: false,
        result_timestamp: None,
        is_success: false,
    }
}

pub fn bearish_record() -> TradeRecord {
    TradeRecord {
        id: "b-1".to_string(),
        direction: Direction::Bearish,
        entry_price: 2615.0,
        targets: vec![Target::at(2605.0), Target::at(2590.0)],
        stop_loss: 2625.0,
        ..bullish_record()
    }
}

pub fn validated_bullish() -> ValidatedAnalysis {
    NewAnalysis {
        symbol: "XAUUSD".to_string(),
        timeframe: "1h".to_string(),
        direction: Direction::Bullish,
        entry_price: 2615.43,
        targets: vec![Target::at(2620.0), Target::at(2630.0)],
        stop_loss: 2600.0,
        duration_hours: None,
    }
    .validate(8)
    .unwrap()
}

pub fn default_test_config() -> Config {
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

/// Market status source with a fixed answer that counts lookups.
pub struct StubMarketStatus {
    open: Option<bool>,
    calls: AtomicUsize,
}

impl StubMarketStatus {
    pub fn open(open: bool) -> Self {
        Self {
            open: Some(open),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            open: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketStatusSource for StubMarketStatus {
    async fn check_market_status(&self, _symbol: Option<&str>) -> Result<MarketStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let is_open = self.open.ok_or_else(|| anyhow!("market status unavailable"))?;
        Ok(MarketStatus {
            is_open,
            timestamp: t0().to_rfc3339(),
        })
    }
}

pub struct StubProbe {
    reachable: AtomicBool,
    calls: AtomicUsize,
}

impl StubProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for StubProbe {
    async fn probe(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("probe timed out"))
        }
    }
}

/// Poll task that sleeps for `delay` and records how many runs overlapped.
pub struct CountingTask {
    delay: std::time::Duration,
    runs: AtomicUsize,
    active: AtomicUsize,
    max_concurrent: AtomicUsize,
    failing: AtomicBool,
}

impl CountingTask {
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            delay,
            runs: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PollTask for CountingTask {
    async fn run(&self) -> Result<()> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now_active, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(anyhow!("tick failed"))
        } else {
            Ok(())
        }
    }
}
