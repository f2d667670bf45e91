//! Kraken WebSocket trade feed
//!
//! Kraken uses positional array frames for data and JSON objects for
//! control messages.
//!
//! ## Data Format Reference
//!
//! ```json
//! [
//!   119930881,                                       // Channel ID
//!   [["42000.10000", "0.013", "1672515782.577", "s", "m", ""]],
//!   "trade",                                         // Channel name
//!   "XBT/USD"                                        // Trading pair
//! ]
//! ```
//!
//! The trade list sits in position 1 and the pair name in position 3.
//! Only the most recent entry of the list is emitted.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use pv_types::{Pair, Trade, Venue};

use crate::error::{CollectorError, Result};
use crate::symbol_map::SymbolMap;

use super::{parse_decimal, ConnectSpec, VenueFeed};

const WEBSOCKET_URL: &str = "wss://ws.kraken.com";

const SYMBOLS: [(Pair, &str); 3] = [
    (Pair::BtcUsd, "XBT/USD"),
    (Pair::EthUsd, "ETH/USD"),
    (Pair::XmrUsd, "XMR/USD"),
];

pub struct KrakenFeed {
    symbols: SymbolMap,
}

impl KrakenFeed {
    pub fn new(pairs: &[Pair]) -> Self {
        Self {
            symbols: SymbolMap::new(&SYMBOLS, pairs),
        }
    }

    fn parse_error(&self, detail: impl Into<String>, frame: &str) -> CollectorError {
        CollectorError::ParseError {
            venue: Venue::Kraken,
            message: frame.to_string(),
            error: detail.into(),
        }
    }
}

#[async_trait]
impl VenueFeed for KrakenFeed {
    fn venue(&self) -> Venue {
        Venue::Kraken
    }

    fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    async fn connect_spec(&self) -> Result<ConnectSpec> {
        Ok(ConnectSpec {
            url: WEBSOCKET_URL.to_string(),
            ping_interval: None,
        })
    }

    fn subscribe_messages(&self) -> Vec<String> {
        vec![json!({
            "event": "subscribe",
            "pair": self.symbols.symbols(),
            "subscription": { "name": "trade" },
        })
        .to_string()]
    }

    fn parse_frame(&self, frame: &str) -> Result<Vec<Trade>> {
        let value: Value = serde_json::from_str(frame)?;

        // Control messages (subscriptionStatus, heartbeat) are objects.
        let Some(elements) = value.as_array() else {
            return Ok(Vec::new());
        };
        if elements.len() < 4 {
            return Ok(Vec::new());
        }

        let channel = elements.get(2).and_then(Value::as_str).unwrap_or_default();
        if channel != "trade" {
            return Ok(Vec::new());
        }

        let symbol = elements
            .get(3)
            .and_then(Value::as_str)
            .ok_or_else(|| self.parse_error("missing pair in position 3", frame))?;
        let Some(pair) = self.symbols.pair_for(symbol) else {
            return Ok(Vec::new());
        };

        let trades = elements
            .get(1)
            .and_then(Value::as_array)
            .ok_or_else(|| self.parse_error("missing trade list in position 1", frame))?;

        // Entries arrive oldest first; keep only the most recent.
        let Some(latest) = trades.last() else {
            return Ok(Vec::new());
        };
        let fields = latest
            .as_array()
            .ok_or_else(|| self.parse_error("trade entry is not an array", frame))?;
        if fields.len() < 3 {
            return Err(self.parse_error("trade entry too short", frame));
        }

        let price = parse_decimal(&fields[0], Venue::Kraken)?;
        let volume = parse_decimal(&fields[1], Venue::Kraken)?;
        // Time is "seconds.microseconds" as a string.
        let time = parse_decimal(&fields[2], Venue::Kraken)?;
        let event_time_ms = (time * Decimal::from(1000))
            .to_i64()
            .ok_or_else(|| self.parse_error("timestamp out of range", frame))?;

        let trade = Trade::new(
            Venue::Kraken,
            pair,
            price,
            volume,
            event_time_ms,
            fields[2].as_str().unwrap_or_default(),
        )
        .map_err(|err| self.parse_error(err.to_string(), frame))?;
        Ok(vec![trade])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn feed() -> KrakenFeed {
        KrakenFeed::new(&Pair::BASE)
    }

    #[test]
    fn parses_array_frame_keeping_latest_entry() {
        let frame = r#"[119930881,[["42000.10000","0.01317184","1672515780.577095","s","m",""],["42001.00000","0.50000000","1672515782.100000","b","l",""]],"trade","XBT/USD"]"#;
        let trades = feed().parse_frame(frame).unwrap();
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.pair, Pair::BtcUsd);
        assert_eq!(trade.price, dec!(42001.00000));
        assert_eq!(trade.volume, dec!(0.50000000));
        assert_eq!(trade.event_time_ms, 1672515782100);
    }

    #[test]
    fn ignores_control_objects() {
        let frame = r#"{"event":"heartbeat"}"#;
        assert!(feed().parse_frame(frame).unwrap().is_empty());
        let frame = r#"{"event":"subscriptionStatus","status":"subscribed","pair":"XBT/USD"}"#;
        assert!(feed().parse_frame(frame).unwrap().is_empty());
    }

    #[test]
    fn ignores_non_trade_channels() {
        let frame = r#"[13959169,{"bs":[["4287.73000","0.1","1672515782.9"]]},"book","ETH/USD"]"#;
        assert!(feed().parse_frame(frame).unwrap().is_empty());
    }

    #[test]
    fn empty_trade_list_emits_nothing() {
        let frame = r#"[119930881,[],"trade","XBT/USD"]"#;
        assert!(feed().parse_frame(frame).unwrap().is_empty());
    }

    #[test]
    fn subscribe_uses_kraken_pair_names() {
        let messages = feed().subscribe_messages();
        assert!(messages[0].contains("XBT/USD"));
        assert!(messages[0].contains("\"name\":\"trade\""));
    }
}
