//! Normalized trade records
//!
//! Every venue feed is normalized into this shape before it enters the venue
//! event log. Trades are ephemeral: they live in the log until acknowledged
//! and in the per-pair buffer for at most the aggregation window.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::pair::Pair;
use crate::venue::Venue;

/// A single normalized trade event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Venue that executed the trade
    pub venue: Venue,
    /// Normalized pair
    pub pair: Pair,
    /// Execution price, strictly positive
    pub price: Decimal,
    /// Executed volume in base units, non-negative
    pub volume: Decimal,
    /// Venue-supplied event time, epoch milliseconds
    pub event_time_ms: i64,
    /// Venue-local trade identifier
    pub venue_trade_id: String,
}

impl Trade {
    /// Build a trade, enforcing `price > 0` and `volume >= 0`.
    ///
    /// Venues occasionally emit zero-volume administrative fills; those are
    /// accepted and contribute zero weight to the VWAP. A non-positive price
    /// is always a parse defect and is rejected.
    pub fn new(
        venue: Venue,
        pair: Pair,
        price: Decimal,
        volume: Decimal,
        event_time_ms: i64,
        venue_trade_id: impl Into<String>,
    ) -> Result<Self, CoreError> {
        if price <= Decimal::ZERO {
            return Err(CoreError::InvalidParams {
                detail: format!("trade price must be positive, got {price}"),
            });
        }
        if volume < Decimal::ZERO {
            return Err(CoreError::InvalidParams {
                detail: format!("trade volume must be non-negative, got {volume}"),
            });
        }
        Ok(Self {
            venue,
            pair,
            price,
            volume,
            event_time_ms,
            venue_trade_id: venue_trade_id.into(),
        })
    }

    /// Event time as a UTC timestamp; saturates on out-of-range input.
    pub fn event_time(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.event_time_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_non_positive_price() {
        let err = Trade::new(Venue::Binance, Pair::BtcUsd, dec!(0), dec!(1), 0, "t1");
        assert!(err.is_err());
        let err = Trade::new(Venue::Binance, Pair::BtcUsd, dec!(-1), dec!(1), 0, "t2");
        assert!(err.is_err());
    }

    #[test]
    fn accepts_zero_volume() {
        let trade =
            Trade::new(Venue::Kraken, Pair::EthUsd, dec!(2500), dec!(0), 1_700_000_000_000, "t3")
                .unwrap();
        assert_eq!(trade.volume, Decimal::ZERO);
    }

    #[test]
    fn rejects_negative_volume() {
        let err = Trade::new(Venue::Okx, Pair::BtcUsd, dec!(100), dec!(-0.5), 0, "t4");
        assert!(err.is_err());
    }
}
