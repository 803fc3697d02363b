use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MAX_DURATION_HOURS, MIN_DURATION_HOURS};
use crate::models::{Direction, Outcome, Timeframe};

pub type RecordId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub price: f64,
    #[serde(default)]
    pub expected_time: Option<DateTime<Utc>>,
}

impl Target {
    pub fn at(price: f64) -> Self {
        Self {
            price,
            expected_time: None,
        }
    }
}

/// One tracked analysis. Owned by the result sink; the engine only ever works
/// on snapshots of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub id: RecordId,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry_price: f64,
    pub targets: Vec<Target>,
    pub stop_loss: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_checked_price: Option<f64>,
    #[serde(default)]
    pub target_hit: bool,
    #[serde(default)]
    pub target_index: Option<usize>,
    #[serde(default)]
    pub stop_loss_hit: bool,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub result_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_success: bool,
}

/// Terminal transition written for a record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    TargetHit { index: usize, at: DateTime<Utc> },
    StopLossHit { at: DateTime<Utc> },
    Expired { at: DateTime<Utc> },
}

impl Resolution {
    pub fn from_outcome(outcome: Outcome, at: DateTime<Utc>) -> Option<Self> {
        match outcome {
            Outcome::None => None,
            Outcome::TargetHit(index) => Some(Resolution::TargetHit { index, at }),
            Outcome::StopLossHit => Some(Resolution::StopLossHit { at }),
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match *self {
            Resolution::TargetHit { at, .. }
            | Resolution::StopLossHit { at }
            | Resolution::Expired { at } => at,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Resolution::TargetHit { .. })
    }
}

/// Everything one evaluation pass writes for one record, in a single call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckUpdate {
    pub checked_at: DateTime<Utc>,
    pub price: Option<f64>,
    pub resolution: Option<Resolution>,
}

impl TradeRecord {
    pub fn is_terminal(&self) -> bool {
        self.target_hit || self.stop_loss_hit || self.expired
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Outcome already stored on the record.
    pub fn outcome(&self) -> Outcome {
        if self.stop_loss_hit {
            Outcome::StopLossHit
        } else if self.target_hit {
            Outcome::TargetHit(self.target_index.unwrap_or(0))
        } else {
            Outcome::None
        }
    }

    /// Applies a check result. Terminal records are left untouched and
    /// `last_checked_at` never moves backwards. Returns whether anything changed.
    pub fn apply_check(&mut self, update: &CheckUpdate) -> bool {
        if self.is_terminal() {
            return false;
        }

        let mut changed = false;
        let newer = self
            .last_checked_at
            .map_or(true, |last| update.checked_at >= last);
        if newer {
            self.last_checked_at = Some(update.checked_at);
            if let Some(price) = update.price {
                self.last_checked_price = Some(price);
            }
            changed = true;
        }

        if let Some(resolution) = update.resolution {
            match resolution {
                Resolution::TargetHit { index, .. } => {
                    self.target_hit = true;
                    self.target_index = Some(index);
                }
                Resolution::StopLossHit { .. } => self.stop_loss_hit = true,
                Resolution::Expired { .. } => self.expired = true,
            }
            self.is_success = resolution.is_success();
            self.result_timestamp = Some(resolution.at());
            changed = true;
        }

        changed
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("symbol is required")]
    MissingSymbol,
    #[error("timeframe is required")]
    MissingTimeframe,
    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),
    #[error("duration must be between 1 and 72 hours, got {0}")]
    DurationOutOfRange(u32),
    #[error("{field} must be a positive price, got {value}")]
    InvalidPrice { field: &'static str, value: f64 },
    #[error("a {0} analysis needs at least one target")]
    MissingTargets(Direction),
    #[error("target {price} is on the wrong side of entry {entry} for a {direction} analysis")]
    TargetWrongSide {
        direction: Direction,
        price: f64,
        entry: f64,
    },
    #[error("stop-loss {stop_loss} is on the wrong side of entry {entry} for a {direction} analysis")]
    StopLossWrongSide {
        direction: Direction,
        stop_loss: f64,
        entry: f64,
    },
}

/// An analysis as submitted by a caller, before any checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnalysis {
    pub symbol: String,
    pub timeframe: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub targets: Vec<Target>,
    pub stop_loss: f64,
    #[serde(default)]
    pub duration_hours: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedAnalysis {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry_price: f64,
    pub targets: Vec<Target>,
    pub stop_loss: f64,
    pub duration: Duration,
}

fn check_price(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidPrice { field, value })
    }
}

impl NewAnalysis {
    pub fn validate(self, default_duration_hours: u32) -> Result<ValidatedAnalysis, ValidationError> {
        let symbol = self.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(ValidationError::MissingSymbol);
        }

        if self.timeframe.trim().is_empty() {
            return Err(ValidationError::MissingTimeframe);
        }
        let timeframe = Timeframe::from_str_loose(&self.timeframe)
            .ok_or_else(|| ValidationError::UnknownTimeframe(self.timeframe.clone()))?;

        let hours = self.duration_hours.unwrap_or(default_duration_hours);
        if !(MIN_DURATION_HOURS..=MAX_DURATION_HOURS).contains(&hours) {
            return Err(ValidationError::DurationOutOfRange(hours));
        }

        check_price("entry price", self.entry_price)?;
        check_price("stop-loss", self.stop_loss)?;
        for t in &self.targets {
            check_price("target", t.price)?;
        }

        let direction = self.direction;
        let entry = self.entry_price;
        let mut targets = self.targets;

        if direction != Direction::Neutral {
            if targets.is_empty() {
                return Err(ValidationError::MissingTargets(direction));
            }
            if let Some(t) = targets
                .iter()
                .find(|t| direction.favourable_distance(entry, t.price) <= 0.0)
            {
                return Err(ValidationError::TargetWrongSide {
                    direction,
                    price: t.price,
                    entry,
                });
            }
            if direction.favourable_distance(entry, self.stop_loss) >= 0.0 {
                return Err(ValidationError::StopLossWrongSide {
                    direction,
                    stop_loss: self.stop_loss,
                    entry,
                });
            }
            targets.sort_by(|a, b| {
                direction
                    .favourable_distance(entry, a.price)
                    .total_cmp(&direction.favourable_distance(entry, b.price))
            });
        }

        Ok(ValidatedAnalysis {
            symbol,
            timeframe,
            direction,
            entry_price: entry,
            targets,
            stop_loss: self.stop_loss,
            duration: Duration::hours(hours as i64),
        })
    }
}

impl ValidatedAnalysis {
    pub fn into_record(self, id: RecordId, created_at: DateTime<Utc>) -> TradeRecord {
        TradeRecord {
            id,
            symbol: self.symbol,
            timeframe: self.timeframe,
            direction: self.direction,
            entry_price: self.entry_price,
            targets: self.targets,
            stop_loss: self.stop_loss,
            created_at,
            expires_at: created_at + self.duration,
            last_checked_at: None,
            last_checked_price: None,
            target_hit: false,
            target_index: None,
            stop_loss_hit: false,
            expired: false,
            result_timestamp: None,
            is_success: false,
        }
    }
}
