use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::ttl_cache::TtlCache;
use crate::remote::MarketStatusSource;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Cached answer to "is this symbol's market open now".
///
/// Lookup failures fail open: an unknown status reports `true` so monitoring
/// of live positions never stops on a calendar outage. Fail-open answers are
/// not cached; the next call asks again.
pub struct MarketCalendar {
    source: Arc<dyn MarketStatusSource>,
    cache: Mutex<TtlCache<String, bool>>,
}

impl MarketCalendar {
    pub fn new(source: Arc<dyn MarketStatusSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: Mutex::new(TtlCache::new(ttl)),
        }
    }

    pub async fn is_open(&self, symbol: &str) -> bool {
        let key = symbol.to_uppercase();
        // Held across the fetch so concurrent callers share one lookup
        let mut cache = self.cache.lock().await;
        if let Some(open) = cache.get(&key) {
            return open;
        }
        cache.purge_expired();

        match self.source.check_market_status(Some(&key)).await {
            Ok(status) => {
                debug!("Market status {}: open={} ({})", key, status.is_open, status.timestamp);
                cache.insert(key, status.is_open);
                status.is_open
            }
            Err(e) => {
                warn!("Market status lookup for {} failed, assuming open: {:#}", key, e);
                true
            }
        }
    }

    /// Last cached answer, without a lookup.
    pub async fn cached(&self, symbol: &str) -> Option<bool> {
        self.cache.lock().await.get(&symbol.to_uppercase())
    }

    /// Forces the next `is_open` for `symbol` to ask the source.
    pub async fn invalidate(&self, symbol: &str) {
        self.cache.lock().await.invalidate(&symbol.to_uppercase());
    }
}
