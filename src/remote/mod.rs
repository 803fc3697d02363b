pub mod http;
pub mod local;

pub use http::HttpAnalysisApi;
pub use local::LocalAnalysisService;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub checked: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStatus {
    pub is_open: bool,
    pub timestamp: String,
}

/// Evaluates every non-terminal record. `updated` counts records that moved
/// to a terminal outcome during the call.
#[async_trait]
pub trait TargetChecker: Send + Sync {
    async fn check_analysis_targets(&self, force_check: bool) -> Result<CheckSummary>;
}

#[async_trait]
pub trait MarketStatusSource: Send + Sync {
    async fn check_market_status(&self, symbol: Option<&str>) -> Result<MarketStatus>;
}
