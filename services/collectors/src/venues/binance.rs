//! Binance WebSocket trade feed
//!
//! Object frames keyed by the `e` event-type field.
//!
//! ## Data Format Reference
//!
//! ```json
//! {
//!   "e": "trade",          // Event type
//!   "E": 1672515782136,    // Event time (ms)
//!   "s": "BTCUSDT",        // Symbol
//!   "t": 12345,            // Trade ID
//!   "p": "0.001",          // Price (string)
//!   "q": "100",            // Quantity (string)
//!   "T": 1672515782136,    // Trade time (ms)
//!   "m": true              // Buyer is maker
//! }
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};

use pv_types::{Pair, Trade, Venue};

use crate::error::{CollectorError, Result};
use crate::symbol_map::SymbolMap;

use super::{decimal_field, i64_field, str_field, ConnectSpec, VenueFeed};

const WEBSOCKET_URL: &str = "wss://stream.binance.com:9443/ws";

const SYMBOLS: [(Pair, &str); 3] = [
    (Pair::BtcUsd, "BTCUSDT"),
    (Pair::EthUsd, "ETHUSDT"),
    (Pair::XmrUsd, "XMRUSDT"),
];

pub struct BinanceFeed {
    symbols: SymbolMap,
}

impl BinanceFeed {
    pub fn new(pairs: &[Pair]) -> Self {
        Self {
            symbols: SymbolMap::new(&SYMBOLS, pairs),
        }
    }
}

#[async_trait]
impl VenueFeed for BinanceFeed {
    fn venue(&self) -> Venue {
        Venue::Binance
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
        let params: Vec<String> = self
            .symbols
            .symbols()
            .iter()
            .map(|s| format!("{}@trade", s.to_lowercase()))
            .collect();
        vec![json!({
            "method": "SUBSCRIBE",
            "params": params,
            "id": 1,
        })
        .to_string()]
    }

    fn parse_frame(&self, frame: &str) -> Result<Vec<Trade>> {
        let value: Value = serde_json::from_str(frame)?;

        // Subscription responses and other control frames carry no `e`.
        let Some(event_type) = value.get("e").and_then(Value::as_str) else {
            return Ok(Vec::new());
        };
        if event_type != "trade" {
            return Ok(Vec::new());
        }

        let symbol = str_field(&value, "s", Venue::Binance)?;
        let Some(pair) = self.symbols.pair_for(symbol) else {
            return Ok(Vec::new());
        };

        let price = decimal_field(&value, "p", Venue::Binance)?;
        let quantity = decimal_field(&value, "q", Venue::Binance)?;
        let trade_time = i64_field(&value, "T", Venue::Binance)?;
        let trade_id = i64_field(&value, "t", Venue::Binance)?;

        let trade = Trade::new(
            Venue::Binance,
            pair,
            price,
            quantity,
            trade_time,
            trade_id.to_string(),
        )
        .map_err(|err| CollectorError::ParseError {
            venue: Venue::Binance,
            message: frame.to_string(),
            error: err.to_string(),
        })?;
        Ok(vec![trade])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn feed() -> BinanceFeed {
        BinanceFeed::new(&Pair::BASE)
    }

    #[test]
    fn parses_trade_event() {
        let frame = r#"{"e":"trade","E":1672515782136,"s":"BTCUSDT","t":12345,"p":"16500.10","q":"0.25","T":1672515782130,"m":true}"#;
        let trades = feed().parse_frame(frame).unwrap();
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.pair, Pair::BtcUsd);
        assert_eq!(trade.price, dec!(16500.10));
        assert_eq!(trade.volume, dec!(0.25));
        assert_eq!(trade.event_time_ms, 1672515782130);
        assert_eq!(trade.venue_trade_id, "12345");
    }

    #[test]
    fn ignores_subscription_response() {
        let frame = r#"{"result":null,"id":1}"#;
        assert!(feed().parse_frame(frame).unwrap().is_empty());
    }

    #[test]
    fn ignores_other_event_types() {
        let frame = r#"{"e":"24hrTicker","s":"BTCUSDT"}"#;
        assert!(feed().parse_frame(frame).unwrap().is_empty());
    }

    #[test]
    fn ignores_unmapped_symbols() {
        let frame = r#"{"e":"trade","s":"DOGEUSDT","t":1,"p":"0.1","q":"5","T":1}"#;
        assert!(feed().parse_frame(frame).unwrap().is_empty());
    }

    #[test]
    fn malformed_price_is_an_error() {
        let frame = r#"{"e":"trade","s":"BTCUSDT","t":1,"p":"not-a-number","q":"5","T":1}"#;
        assert!(feed().parse_frame(frame).is_err());
    }

    #[test]
    fn subscribe_uses_lowercase_stream_names() {
        let messages = feed().subscribe_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("btcusdt@trade"));
        assert!(messages[0].contains("SUBSCRIBE"));
    }
}
