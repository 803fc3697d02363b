use tracing::debug;

use crate::models::{PixelBuffer, PriceSample};

pub const BANDS: usize = 10;
/// Left-most columns averaged for the per-band signal.
pub const SIGNAL_COLUMNS: usize = 50;
/// Bands whose centre lies within this fraction of the height from the
/// midpoint are read as the current-price row.
pub const MIDPOINT_TOLERANCE: f64 = 0.05;
/// Price offset across the full chart height.
pub const PRICE_SPAN: f64 = 100.0;

/// Approximate price reader for chart frames.
///
/// This is a row-sampling heuristic, not OCR of the price axis: the band at
/// the vertical midpoint reads as the reference price and every other band is
/// offset linearly by its distance from the midpoint. Consumers must treat the
/// values as noisy.
#[derive(Debug, Clone, Copy)]
pub struct ChartSampler {
    fallback_price: f64,
}

struct Band {
    start: usize,
    end: usize,
    center: f64,
}

impl ChartSampler {
    pub fn new(fallback_price: f64) -> Self {
        Self { fallback_price }
    }

    pub fn fallback_price(&self) -> f64 {
        self.fallback_price
    }

    /// Price points for each band, top to bottom. Malformed frames give an
    /// empty sequence.
    pub fn sample(&self, buffer: &PixelBuffer, reference: Option<f64>) -> Vec<PriceSample> {
        if !buffer.is_well_formed() {
            debug!(
                "Skipping malformed frame {}x{} ({} bytes)",
                buffer.width,
                buffer.height,
                buffer.data.len()
            );
            return Vec::new();
        }

        let reference = reference
            .filter(|p| p.is_finite())
            .unwrap_or(self.fallback_price);
        let height = buffer.height as f64;
        let mid = height / 2.0;
        let tolerance = height * MIDPOINT_TOLERANCE;

        let bands = bands(buffer.height);
        let nearest = bands
            .iter()
            .map(|b| (b.center - mid).abs())
            .fold(f64::INFINITY, f64::min);

        bands
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let distance = (b.center - mid).abs();
                let is_current = distance <= tolerance || (distance - nearest).abs() < 1e-9;
                let price = if is_current {
                    reference
                } else {
                    round2(reference + (b.center - mid) / height * PRICE_SPAN)
                };
                PriceSample {
                    band: i,
                    row: (b.center as usize).min(buffer.height - 1),
                    price,
                    is_current,
                }
            })
            .collect()
    }

    /// Mean RGB luminance of the left-most columns of each band.
    pub fn band_luminance(&self, buffer: &PixelBuffer) -> Vec<f64> {
        if !buffer.is_well_formed() {
            return Vec::new();
        }
        let cols = buffer.width.min(SIGNAL_COLUMNS);

        bands(buffer.height)
            .iter()
            .map(|b| {
                let mut total = 0.0;
                let mut count = 0usize;
                for y in b.start..b.end {
                    for x in 0..cols {
                        if let Some([r, g, bl, _]) = buffer.pixel(x, y) {
                            total += (r as f64 + g as f64 + bl as f64) / 3.0;
                            count += 1;
                        }
                    }
                }
                if count == 0 {
                    0.0
                } else {
                    total / count as f64
                }
            })
            .collect()
    }

    /// Price of the current-price row, if the sequence has one.
    pub fn current_price(samples: &[PriceSample]) -> Option<f64> {
        samples.iter().find(|s| s.is_current).map(|s| s.price)
    }
}

fn bands(height: usize) -> Vec<Band> {
    let count = BANDS.min(height);
    if count == 0 {
        return Vec::new();
    }
    let band_height = height as f64 / count as f64;
    (0..count)
        .map(|i| {
            let start = (i as f64 * band_height) as usize;
            let end = (((i + 1) as f64 * band_height) as usize).clamp(start + 1, height);
            Band {
                start,
                end,
                center: (i as f64 + 0.5) * band_height,
            }
        })
        .collect()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
