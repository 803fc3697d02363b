use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

use crate::remote::{MarketStatus, MarketStatusSource};

/// Weekly trading schedule in UTC: closed on weekends and during a daily
/// maintenance window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingHours {
    pub maintenance_start_hour: u32,
    pub maintenance_end_hour: u32,
}

impl Default for TradingHours {
    fn default() -> Self {
        Self {
            maintenance_start_hour: 21,
            maintenance_end_hour: 22,
        }
    }
}

impl TradingHours {
    pub fn is_weekend(utc_now: DateTime<Utc>) -> bool {
        matches!(utc_now.weekday(), Weekday::Sat | Weekday::Sun)
    }

    pub fn in_maintenance(&self, utc_now: DateTime<Utc>) -> bool {
        let hour = utc_now.hour();
        hour >= self.maintenance_start_hour && hour < self.maintenance_end_hour
    }

    pub fn is_open_at(&self, utc_now: DateTime<Utc>) -> bool {
        !Self::is_weekend(utc_now) && !self.in_maintenance(utc_now)
    }
}

#[async_trait]
impl MarketStatusSource for TradingHours {
    async fn check_market_status(&self, _symbol: Option<&str>) -> Result<MarketStatus> {
        let now = Utc::now();
        Ok(MarketStatus {
            is_open: self.is_open_at(now),
            timestamp: now.to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // 2024-01-15 is a Monday
    fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn open_mid_session() {
        let hours = TradingHours::default();
        assert!(hours.is_open_at(utc(15, 10, 0)));
        assert!(hours.is_open_at(utc(17, 0, 0)));
    }

    #[test]
    fn closed_during_maintenance() {
        let hours = TradingHours::default();
        assert!(hours.is_open_at(utc(16, 20, 59)));
        assert!(!hours.is_open_at(utc(16, 21, 0)));
        assert!(!hours.is_open_at(utc(16, 21, 59)));
        assert!(hours.is_open_at(utc(16, 22, 0)));
        assert!(hours.is_open_at(utc(16, 23, 30)));
    }

    #[test]
    fn closed_on_weekend() {
        let hours = TradingHours::default();
        assert!(!hours.is_open_at(utc(20, 12, 0))); // Saturday
        assert!(!hours.is_open_at(utc(21, 23, 0))); // Sunday evening
        assert!(hours.is_open_at(utc(22, 0, 0))); // Monday midnight
    }

    #[tokio::test]
    async fn reports_as_status_source() {
        let status = TradingHours::default()
            .check_market_status(Some("XAUUSD"))
            .await
            .unwrap();
        assert!(DateTime::parse_from_rfc3339(&status.timestamp).is_ok());
    }
}
