//! Coinbase WebSocket trade feed
//!
//! Object frames keyed by `type`; only `match` events are trades. Coinbase
//! does not list `xmr-usd`; its absence from the symbol map means the
//! venue simply never contributes to that pair.
//!
//! ## Data Format Reference
//!
//! ```json
//! {
//!   "type": "match",
//!   "trade_id": 10,
//!   "sequence": 50,
//!   "time": "2024-01-01T12:00:00.123456Z",
//!   "product_id": "BTC-USD",
//!   "size": "5.23512",
//!   "price": "400.23",
//!   "side": "sell"
//! }
//! ```

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::{json, Value};

use pv_types::{Pair, Trade, Venue};

use crate::error::{CollectorError, Result};
use crate::symbol_map::SymbolMap;

use super::{decimal_field, str_field, ConnectSpec, VenueFeed};

const WEBSOCKET_URL: &str = "wss://ws-feed.exchange.coinbase.com";

// No XMR-USD: Coinbase does not list it.
const SYMBOLS: [(Pair, &str); 2] = [(Pair::BtcUsd, "BTC-USD"), (Pair::EthUsd, "ETH-USD")];

pub struct CoinbaseFeed {
    symbols: SymbolMap,
}

impl CoinbaseFeed {
    pub fn new(pairs: &[Pair]) -> Self {
        Self {
            symbols: SymbolMap::new(&SYMBOLS, pairs),
        }
    }

    fn parse_time(time: &str) -> Result<i64> {
        DateTime::parse_from_rfc3339(time)
            .map(|t| t.timestamp_millis())
            .map_err(|err| CollectorError::ParseError {
                venue: Venue::Coinbase,
                message: format!("invalid timestamp: {time}"),
                error: err.to_string(),
            })
    }
}

#[async_trait]
impl VenueFeed for CoinbaseFeed {
    fn venue(&self) -> Venue {
        Venue::Coinbase
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
            "type": "subscribe",
            "product_ids": self.symbols.symbols(),
            "channels": ["matches"],
        })
        .to_string()]
    }

    fn parse_frame(&self, frame: &str) -> Result<Vec<Trade>> {
        let value: Value = serde_json::from_str(frame)?;

        match value.get("type").and_then(Value::as_str) {
            Some("match") => {}
            // Subscriptions confirmations, heartbeats, last_match snapshots.
            _ => return Ok(Vec::new()),
        }

        let product_id = str_field(&value, "product_id", Venue::Coinbase)?;
        let Some(pair) = self.symbols.pair_for(product_id) else {
            return Ok(Vec::new());
        };

        let price = decimal_field(&value, "price", Venue::Coinbase)?;
        let size = decimal_field(&value, "size", Venue::Coinbase)?;
        let time = str_field(&value, "time", Venue::Coinbase)?;
        let event_time_ms = Self::parse_time(time)?;
        let trade_id = value
            .get("trade_id")
            .and_then(Value::as_i64)
            .unwrap_or_default();

        let trade = Trade::new(
            Venue::Coinbase,
            pair,
            price,
            size,
            event_time_ms,
            trade_id.to_string(),
        )
        .map_err(|err| CollectorError::ParseError {
            venue: Venue::Coinbase,
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

    fn feed() -> CoinbaseFeed {
        CoinbaseFeed::new(&Pair::BASE)
    }

    #[test]
    fn parses_match_event() {
        let frame = r#"{"type":"match","trade_id":865412,"sequence":50,"time":"2024-01-01T12:00:00.123456Z","product_id":"BTC-USD","size":"0.5","price":"42000.25","side":"sell"}"#;
        let trades = feed().parse_frame(frame).unwrap();
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.pair, Pair::BtcUsd);
        assert_eq!(trade.price, dec!(42000.25));
        assert_eq!(trade.volume, dec!(0.5));
        assert_eq!(trade.venue_trade_id, "865412");
    }

    #[test]
    fn filters_non_match_types() {
        let frame = r#"{"type":"heartbeat","sequence":90,"product_id":"BTC-USD"}"#;
        assert!(feed().parse_frame(frame).unwrap().is_empty());
        let frame = r#"{"type":"subscriptions","channels":[]}"#;
        assert!(feed().parse_frame(frame).unwrap().is_empty());
    }

    #[test]
    fn xmr_is_never_mapped() {
        // Requesting xmr-usd is fine; the venue just has no symbol for it.
        let feed = CoinbaseFeed::new(&Pair::BASE);
        assert_eq!(feed.symbols().venue_symbol(Pair::XmrUsd), None);
        assert_eq!(feed.symbols().pairs().len(), 2);
    }

    #[test]
    fn subscribe_lists_mapped_products_only() {
        let messages = feed().subscribe_messages();
        assert!(messages[0].contains("BTC-USD"));
        assert!(messages[0].contains("matches"));
        assert!(!messages[0].contains("XMR"));
    }
}
