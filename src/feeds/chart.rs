use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

use crate::core::chart_sampler::ChartSampler;
use crate::feeds::PriceSource;
use crate::models::PixelBuffer;

/// Supplies chart frames, e.g. screenshots of an embedded chart widget.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&mut self) -> Result<Option<PixelBuffer>>;
}

/// Raw RGBA frame file that an external capture tool keeps overwriting.
/// Dimensions come from configuration since the file carries no header.
pub struct RawFrameFile {
    path: PathBuf,
    width: usize,
    height: usize,
}

impl RawFrameFile {
    pub fn new(path: impl Into<PathBuf>, width: usize, height: usize) -> Self {
        Self {
            path: path.into(),
            width,
            height,
        }
    }
}

#[async_trait]
impl FrameSource for RawFrameFile {
    async fn capture(&mut self) -> Result<Option<PixelBuffer>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No chart frame at {} yet", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read chart frame {}", self.path.display()))
            }
        };
        Ok(Some(PixelBuffer::new(self.width, self.height, data)))
    }
}

/// Reads the price off captured chart frames. The last price read becomes
/// the reference for the next frame.
pub struct ChartPriceSource<F> {
    frames: F,
    sampler: ChartSampler,
    reference: Option<f64>,
}

impl<F: FrameSource> ChartPriceSource<F> {
    pub fn new(frames: F, sampler: ChartSampler) -> Self {
        Self {
            frames,
            sampler,
            reference: None,
        }
    }

    /// Seeds the reference price, e.g. from a live quote.
    pub fn with_reference(mut self, price: f64) -> Self {
        self.reference = Some(price);
        self
    }
}

#[async_trait]
impl<F: FrameSource> PriceSource for ChartPriceSource<F> {
    fn name(&self) -> &'static str {
        "chart"
    }

    async fn latest_price(&mut self) -> Result<Option<f64>> {
        let Some(frame) = self.frames.capture().await? else {
            return Ok(None);
        };

        let samples = self.sampler.sample(&frame, self.reference);
        let Some(price) = ChartSampler::current_price(&samples) else {
            return Ok(None);
        };

        let signal = self.sampler.band_luminance(&frame);
        debug!("Chart frame: price {:.2}, band signal {:?}", price, signal);

        self.reference = Some(price);
        Ok(Some(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Frames(VecDeque<Option<PixelBuffer>>);

    #[async_trait]
    impl FrameSource for Frames {
        async fn capture(&mut self) -> Result<Option<PixelBuffer>> {
            Ok(self.0.pop_front().flatten())
        }
    }

    #[tokio::test]
    async fn reads_reference_then_carries_it() {
        let frames = Frames(
            vec![
                Some(PixelBuffer::uniform(60, 100, [10, 10, 10, 255])),
                Some(PixelBuffer::new(0, 0, Vec::new())),
                None,
            ]
            .into(),
        );
        let mut source =
            ChartPriceSource::new(frames, ChartSampler::new(2600.0)).with_reference(2615.43);

        assert_eq!(source.latest_price().await.unwrap(), Some(2615.43));
        // Malformed frame is skipped, not an error
        assert_eq!(source.latest_price().await.unwrap(), None);
        assert_eq!(source.latest_price().await.unwrap(), None);
        assert_eq!(source.reference, Some(2615.43));
    }

    #[tokio::test]
    async fn reads_frames_from_file() {
        let path = std::env::temp_dir().join(format!("chart_frame_{}.rgba", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let frames = RawFrameFile::new(&path, 60, 100);
        let mut source = ChartPriceSource::new(frames, ChartSampler::new(2600.0)).with_reference(2615.43);

        // Nothing captured yet
        assert_eq!(source.latest_price().await.unwrap(), None);

        std::fs::write(&path, PixelBuffer::uniform(60, 100, [10, 10, 10, 255]).data).unwrap();
        assert_eq!(source.latest_price().await.unwrap(), Some(2615.43));

        // Truncated capture reads as malformed
        std::fs::write(&path, vec![0u8; 40]).unwrap();
        assert_eq!(source.latest_price().await.unwrap(), None);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn falls_back_without_reference() {
        let frames = Frames(vec![Some(PixelBuffer::uniform(60, 100, [0, 0, 0, 255]))].into());
        let mut source = ChartPriceSource::new(frames, ChartSampler::new(2600.0));
        assert_eq!(source.latest_price().await.unwrap(), Some(2600.0));
    }
}
