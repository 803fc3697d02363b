use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::chart_sampler::ChartSampler;

pub type SharedConfig = Arc<RwLock<Config>>;

pub const MIN_DURATION_HOURS: u32 = 1;
pub const MAX_DURATION_HOURS: u32 = 72;

/// Where the price poller reads prices from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSourceKind {
    /// Prices pushed in by the host (stdin in the daemon).
    Live,
    /// Prices read off raw RGBA chart frames.
    Chart,
}

impl PriceSourceKind {
    pub fn from_str_loose(s: &str) -> Option<PriceSourceKind> {
        match s.trim().to_lowercase().as_str() {
            "live" | "feed" => Some(PriceSourceKind::Live),
            "chart" | "frames" => Some(PriceSourceKind::Chart),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Instrument
    pub symbol: String,
    pub analysis_duration_hours: u32,
    pub fallback_price: f64,

    // Price source
    pub price_source: PriceSourceKind,
    pub chart_frame_path: String,
    pub chart_frame_width: usize,
    pub chart_frame_height: usize,
    pub chart_reference_price: Option<f64>,

    // Poll cadences (seconds)
    pub price_poll_secs: u64,
    pub target_check_secs: u64,
    pub market_status_secs: u64,
    pub network_check_secs: u64,

    // Market calendar
    pub market_cache_ttl_secs: u64,

    // Reachability probe
    pub probe_url: String,
    pub probe_timeout_secs: u64,

    // Remote evaluation API (empty base url = in-process evaluation)
    pub api_base_url: String,
    pub api_key: String,
    pub api_secret: String,

    // Persistence
    pub records_file: String,

    // Logging
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        Config {
            symbol: env("SYMBOL", "XAUUSD"),
            analysis_duration_hours: env("ANALYSIS_DURATION_HOURS", "8")
                .parse()
                .unwrap_or(8)
                .clamp(MIN_DURATION_HOURS, MAX_DURATION_HOURS),
            fallback_price: env("FALLBACK_PRICE", "2600").parse().unwrap_or(2600.0),
            price_source: PriceSourceKind::from_str_loose(&env("PRICE_SOURCE", "live"))
                .unwrap_or(PriceSourceKind::Live),
            chart_frame_path: env("CHART_FRAME_PATH", "logs/chart_frame.rgba"),
            chart_frame_width: env("CHART_FRAME_WIDTH", "0").parse().unwrap_or(0),
            chart_frame_height: env("CHART_FRAME_HEIGHT", "0").parse().unwrap_or(0),
            chart_reference_price: std::env::var("CHART_REFERENCE_PRICE")
                .ok()
                .and_then(|v| v.parse().ok()),
            price_poll_secs: env("PRICE_POLL_SECS", "5").parse().unwrap_or(5),
            target_check_secs: env("TARGET_CHECK_SECS", "30").parse().unwrap_or(30),
            market_status_secs: env("MARKET_STATUS_SECS", "300").parse().unwrap_or(300),
            network_check_secs: env("NETWORK_CHECK_SECS", "30").parse().unwrap_or(30),
            market_cache_ttl_secs: env("MARKET_CACHE_TTL_SECS", "300").parse().unwrap_or(300),
            probe_url: env("PROBE_URL", "https://www.gstatic.com/generate_204"),
            probe_timeout_secs: env("PROBE_TIMEOUT_SECS", "5").parse().unwrap_or(5),
            api_base_url: env("API_BASE_URL", "").trim_end_matches('/').to_string(),
            api_key: env("API_KEY", ""),
            api_secret: env("API_SECRET", ""),
            records_file: env("RECORDS_FILE", "logs/analysis_records.json"),
            log_level: env("LOG_LEVEL", "INFO"),
        }
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    pub fn uses_remote_api(&self) -> bool {
        !self.api_base_url.is_empty()
    }

    pub fn price_poll_interval(&self) -> Duration {
        Duration::from_secs(self.price_poll_secs.max(1))
    }

    pub fn target_check_interval(&self) -> Duration {
        Duration::from_secs(self.target_check_secs.max(1))
    }

    pub fn market_status_interval(&self) -> Duration {
        Duration::from_secs(self.market_status_secs.max(1))
    }

    pub fn network_check_interval(&self) -> Duration {
        Duration::from_secs(self.network_check_secs.max(1))
    }

    pub fn market_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.market_cache_ttl_secs)
    }

    /// Sampler for chart-backed price sources, seeded with the instrument's fallback.
    pub fn chart_sampler(&self) -> ChartSampler {
        ChartSampler::new(self.fallback_price)
    }
}
