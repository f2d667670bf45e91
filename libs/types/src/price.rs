//! Canonical price rows and the cached broadcast payload

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pair::Pair;

/// Aggregation method recorded on every canonical price row.
pub const PRICE_METHOD_VWAP: &str = "vwap";

/// A canonical price emitted by the stream aggregator.
///
/// Immutable once written. `event_time` is the aggregator's wall clock at
/// emission, not the newest trade time, so rows within a pair form a
/// monotone series key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub pair: Pair,
    /// Volume-weighted price over the trailing window, strictly positive
    pub price: Decimal,
    /// Wall clock at emission
    pub event_time: DateTime<Utc>,
    /// Always [`PRICE_METHOD_VWAP`]
    pub method: String,
    /// Distinct contributing venue names, insertion-ordered
    pub sources: Vec<String>,
    /// Total traded volume across contributing trades
    pub volume: Decimal,
}

impl PriceRecord {
    pub fn new(
        pair: Pair,
        price: Decimal,
        event_time: DateTime<Utc>,
        sources: Vec<String>,
        volume: Decimal,
    ) -> Self {
        Self {
            pair,
            price,
            event_time,
            method: PRICE_METHOD_VWAP.to_string(),
            sources,
            volume,
        }
    }
}

/// The JSON payload cached under `price:{pair}` and broadcast on the
/// matching pub/sub channel. Also the RPC `getPrice` response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePayload {
    pub pair: Pair,
    pub price: Decimal,
    /// Emission time, RFC 3339
    pub timestamp: DateTime<Utc>,
}

impl From<&PriceRecord> for PricePayload {
    fn from(record: &PriceRecord) -> Self {
        Self {
            pair: record.pair,
            price: record.price,
            timestamp: record.event_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn record_carries_vwap_method() {
        let record = PriceRecord::new(
            Pair::BtcUsd,
            dec!(45000),
            Utc::now(),
            vec!["binance".to_string()],
            dec!(1.5),
        );
        assert_eq!(record.method, PRICE_METHOD_VWAP);
    }

    #[test]
    fn payload_mirrors_record() {
        let record = PriceRecord::new(
            Pair::EthUsd,
            dec!(2500),
            Utc::now(),
            vec!["kraken".to_string()],
            dec!(3),
        );
        let payload = PricePayload::from(&record);
        assert_eq!(payload.pair, record.pair);
        assert_eq!(payload.price, record.price);
        assert_eq!(payload.timestamp, record.event_time);
    }
}
