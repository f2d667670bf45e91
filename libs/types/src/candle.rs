//! OHLCV candles and roll-up resolutions

use chrono::{DateTime, DurationRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::pair::Pair;

/// Candle roll-up interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "5min")]
    FiveMin,
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "1day")]
    OneDay,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::FiveMin, Resolution::OneHour, Resolution::OneDay];

    /// Table suffix and wire name: `5min`, `1hour`, `1day`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::FiveMin => "5min",
            Resolution::OneHour => "1hour",
            Resolution::OneDay => "1day",
        }
    }

    /// Length of one period.
    pub fn duration(&self) -> chrono::Duration {
        match self {
            Resolution::FiveMin => chrono::Duration::minutes(5),
            Resolution::OneHour => chrono::Duration::hours(1),
            Resolution::OneDay => chrono::Duration::days(1),
        }
    }

    /// Floor `t` to the start of its period in UTC.
    pub fn period_start_for(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Resolution::FiveMin => t
                .duration_trunc(chrono::Duration::minutes(5))
                .unwrap_or(t),
            Resolution::OneHour => t.duration_trunc(chrono::Duration::hours(1)).unwrap_or(t),
            Resolution::OneDay => t
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc())
                .unwrap_or(t),
        }
    }

    /// Default retention in days; `0` means keep forever.
    pub fn default_retention_days(&self) -> u32 {
        match self {
            Resolution::FiveMin => 30,
            Resolution::OneHour => 365,
            Resolution::OneDay => 0,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Resolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5min" => Ok(Resolution::FiveMin),
            "1hour" => Ok(Resolution::OneHour),
            "1day" => Ok(Resolution::OneDay),
            other => Err(CoreError::InvalidInterval {
                value: other.to_string(),
            }),
        }
    }
}

/// One OHLCV candle, upserted by `(pair, period_start)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub pair: Pair,
    pub period_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Volume-weighted price for the period; `None` when unrecorded
    pub vwap: Option<Decimal>,
    pub trade_count: i64,
}

impl Candle {
    /// Check the structural invariants of a computed candle.
    pub fn validate(&self) -> Result<(), CoreError> {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || body_high > self.high {
            return Err(CoreError::Internal {
                detail: format!(
                    "candle bounds violated for {} at {}: low={} open={} close={} high={}",
                    self.pair, self.period_start, self.low, self.open, self.close, self.high
                ),
            });
        }
        if self.volume < Decimal::ZERO {
            return Err(CoreError::Internal {
                detail: format!("negative candle volume for {}", self.pair),
            });
        }
        if self.trade_count <= 0 {
            return Err(CoreError::Internal {
                detail: format!("empty candle emitted for {}", self.pair),
            });
        }
        if let Some(vwap) = self.vwap {
            if vwap < self.low || vwap > self.high {
                return Err(CoreError::Internal {
                    detail: format!("candle vwap {} outside [{}, {}]", vwap, self.low, self.high),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, h, m, s).unwrap()
    }

    #[test]
    fn five_min_flooring() {
        assert_eq!(
            Resolution::FiveMin.period_start_for(at(10, 17, 42)),
            at(10, 15, 0)
        );
        assert_eq!(
            Resolution::FiveMin.period_start_for(at(10, 15, 0)),
            at(10, 15, 0)
        );
    }

    #[test]
    fn hour_and_day_flooring() {
        assert_eq!(
            Resolution::OneHour.period_start_for(at(10, 59, 59)),
            at(10, 0, 0)
        );
        assert_eq!(
            Resolution::OneDay.period_start_for(at(23, 59, 59)),
            at(0, 0, 0)
        );
    }

    #[test]
    fn candle_invariants() {
        let mut candle = Candle {
            pair: Pair::BtcUsd,
            period_start: at(10, 0, 0),
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close: dec!(105),
            volume: dec!(4),
            vwap: Some(dec!(103)),
            trade_count: 3,
        };
        assert!(candle.validate().is_ok());

        candle.vwap = Some(dec!(111));
        assert!(candle.validate().is_err());

        candle.vwap = None;
        candle.trade_count = 0;
        assert!(candle.validate().is_err());
    }

    #[test]
    fn resolution_wire_names() {
        for resolution in Resolution::ALL {
            assert_eq!(
                resolution.as_str().parse::<Resolution>().unwrap(),
                resolution
            );
        }
        assert!("2min".parse::<Resolution>().is_err());
    }
}
