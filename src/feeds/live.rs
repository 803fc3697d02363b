use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

use crate::feeds::PriceSource;

/// Producer side of a pushed price feed.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    tx: watch::Sender<Option<f64>>,
}

impl FeedHandle {
    /// Pushes a new price. Non-finite or non-positive values are dropped.
    pub fn push(&self, price: f64) -> bool {
        if !price.is_finite() || price <= 0.0 {
            return false;
        }
        self.tx.send_replace(Some(price));
        true
    }
}

/// Price source backed by the most recent value pushed to a `FeedHandle`.
pub struct LiveFeedSource {
    rx: watch::Receiver<Option<f64>>,
}

impl LiveFeedSource {
    pub fn new() -> (Self, FeedHandle) {
        let (tx, rx) = watch::channel(None);
        (Self { rx }, FeedHandle { tx })
    }
}

#[async_trait]
impl PriceSource for LiveFeedSource {
    fn name(&self) -> &'static str {
        "live-feed"
    }

    async fn latest_price(&mut self) -> Result<Option<f64>> {
        Ok(*self.rx.borrow_and_update())
    }
}
