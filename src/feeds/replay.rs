use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::feeds::PriceSource;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Replays a recorded price series. Each `latest_price` call steps one point
/// forward; `price_at` looks up the series at an arbitrary time.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    points: Vec<PricePoint>,
    cursor: usize,
}

impl ReplaySource {
    pub fn new(mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        Self { points, cursor: 0 }
    }

    /// Evenly spaced series starting at `start`.
    pub fn from_prices(start: DateTime<Utc>, step: Duration, prices: &[f64]) -> Self {
        let points = prices
            .iter()
            .enumerate()
            .map(|(i, &price)| PricePoint {
                timestamp: start + step * i as i32,
                price,
            })
            .collect();
        Self::new(points)
    }

    /// Loads `timestamp,price` lines (RFC 3339 timestamps). A header line and
    /// blank lines are skipped.
    pub fn load_csv(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let mut points = Vec::new();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || (n == 0 && line.to_lowercase().starts_with("timestamp")) {
                continue;
            }
            let (ts, price) = line
                .split_once(',')
                .with_context(|| format!("line {}: expected timestamp,price", n + 1))?;
            let timestamp = DateTime::parse_from_rfc3339(ts.trim())
                .with_context(|| format!("line {}: bad timestamp {:?}", n + 1, ts))?
                .with_timezone(&Utc);
            let price: f64 = price
                .trim()
                .parse()
                .with_context(|| format!("line {}: bad price {:?}", n + 1, price))?;
            points.push(PricePoint { timestamp, price });
        }

        Ok(Self::new(points))
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn remaining(&self) -> usize {
        self.points.len() - self.cursor
    }

    /// Last price at or before `t`.
    pub fn price_at(&self, t: DateTime<Utc>) -> Option<f64> {
        match self.points.partition_point(|p| p.timestamp <= t) {
            0 => None,
            n => Some(self.points[n - 1].price),
        }
    }
}

#[async_trait]
impl PriceSource for ReplaySource {
    fn name(&self) -> &'static str {
        "replay"
    }

    async fn latest_price(&mut self) -> Result<Option<f64>> {
        let point = self.points.get(self.cursor).copied();
        if point.is_some() {
            self.cursor += 1;
        }
        Ok(point.map(|p| p.price))
    }
}
