pub mod chart;
pub mod live;
pub mod replay;

pub use chart::{ChartPriceSource, FrameSource, RawFrameFile};
pub use live::{FeedHandle, LiveFeedSource};
pub use replay::ReplaySource;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Config, PriceSourceKind};

/// Where the price poller reads the current price from.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Current price estimate, or `None` when nothing usable is available yet.
    async fn latest_price(&mut self) -> Result<Option<f64>>;
}

/// Builds the configured price source. The handle is returned only for the
/// live feed, which needs something to push prices into it.
pub fn from_config(cfg: &Config) -> (Box<dyn PriceSource>, Option<FeedHandle>) {
    match cfg.price_source {
        PriceSourceKind::Live => {
            let (source, handle) = LiveFeedSource::new();
            (Box::new(source) as Box<dyn PriceSource>, Some(handle))
        }
        PriceSourceKind::Chart => {
            let frames = RawFrameFile::new(
                &cfg.chart_frame_path,
                cfg.chart_frame_width,
                cfg.chart_frame_height,
            );
            let mut source = ChartPriceSource::new(frames, cfg.chart_sampler());
            if let Some(price) = cfg.chart_reference_price {
                source = source.with_reference(price);
            }
            (Box::new(source) as Box<dyn PriceSource>, None)
        }
    }
}
