use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Bearish => "bearish",
            Direction::Neutral => "neutral",
        }
    }

    /// Signed distance of `price` from `entry` in the trade's favourable direction.
    pub fn favourable_distance(&self, entry: f64, price: f64) -> f64 {
        match self {
            Direction::Bullish => price - entry,
            Direction::Bearish => entry - price,
            Direction::Neutral => 0.0,
        }
    }
}

/// Result of evaluating one record against one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum Outcome {
    None,
    TargetHit(usize),
    StopLossHit,
}

impl Outcome {
    pub fn is_none(&self) -> bool {
        matches!(self, Outcome::None)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::TargetHit(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::None => write!(f, "none"),
            Outcome::TargetHit(i) => write!(f, "target_hit({})", i),
            Outcome::StopLossHit => write!(f, "stop_loss_hit"),
        }
    }
}
