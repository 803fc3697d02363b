use serde::{Deserialize, Serialize};

pub const CHANNELS: usize = 4;

/// Row-major RGBA pixel buffer captured from a chart.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PixelBuffer {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Buffer filled with a single colour.
    pub fn uniform(width: usize, height: usize, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(byte_len(width, height).unwrap_or(0))
            .collect();
        Self::new(width, height, data)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Declared dimensions agree with the backing data. Dimensions whose byte
    /// size does not fit in `usize` are malformed.
    pub fn is_well_formed(&self) -> bool {
        !self.is_empty()
            && byte_len(self.width, self.height).is_some_and(|len| self.data.len() >= len)
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y
            .checked_mul(self.width)?
            .checked_add(x)?
            .checked_mul(CHANNELS)?;
        let px = self.data.get(i..i.checked_add(CHANNELS)?)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

fn byte_len(width: usize, height: usize) -> Option<usize> {
    width.checked_mul(height)?.checked_mul(CHANNELS)
}

/// One price point read off a chart band, ordered top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSample {
    pub band: usize,
    pub row: usize,
    pub price: f64,
    pub is_current: bool,
}
