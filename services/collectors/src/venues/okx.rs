//! OKX WebSocket trade feed
//!
//! Object frames keyed by `arg.channel` with a `data` array.
//!
//! ## Data Format Reference
//!
//! ```json
//! {
//!   "arg": { "channel": "trades", "instId": "BTC-USDT" },
//!   "data": [
//!     {
//!       "instId": "BTC-USDT",
//!       "tradeId": "130639474",
//!       "px": "42219.9",
//!       "sz": "0.12060306",
//!       "side": "buy",
//!       "ts": "1630048897897"
//!     }
//!   ]
//! }
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};

use pv_types::{Pair, Trade, Venue};

use crate::error::{CollectorError, Result};
use crate::symbol_map::SymbolMap;

use super::{decimal_field, i64_field, str_field, ConnectSpec, VenueFeed};

const WEBSOCKET_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

const SYMBOLS: [(Pair, &str); 3] = [
    (Pair::BtcUsd, "BTC-USDT"),
    (Pair::EthUsd, "ETH-USDT"),
    (Pair::XmrUsd, "XMR-USDT"),
];

pub struct OkxFeed {
    symbols: SymbolMap,
}

impl OkxFeed {
    pub fn new(pairs: &[Pair]) -> Self {
        Self {
            symbols: SymbolMap::new(&SYMBOLS, pairs),
        }
    }
}

#[async_trait]
impl VenueFeed for OkxFeed {
    fn venue(&self) -> Venue {
        Venue::Okx
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
        let args: Vec<Value> = self
            .symbols
            .symbols()
            .iter()
            .map(|symbol| json!({ "channel": "trades", "instId": symbol }))
            .collect();
        vec![json!({ "op": "subscribe", "args": args }).to_string()]
    }

    fn parse_frame(&self, frame: &str) -> Result<Vec<Trade>> {
        let value: Value = serde_json::from_str(frame)?;

        let channel = value
            .get("arg")
            .and_then(|arg| arg.get("channel"))
            .and_then(Value::as_str);
        if channel != Some("trades") {
            // Subscription confirmations carry an `event` field instead.
            return Ok(Vec::new());
        }
        let Some(data) = value.get("data").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        let mut trades = Vec::with_capacity(data.len());
        for entry in data {
            let symbol = str_field(entry, "instId", Venue::Okx)?;
            let Some(pair) = self.symbols.pair_for(symbol) else {
                continue;
            };
            let price = decimal_field(entry, "px", Venue::Okx)?;
            let size = decimal_field(entry, "sz", Venue::Okx)?;
            let ts = i64_field(entry, "ts", Venue::Okx)?;
            let trade_id = str_field(entry, "tradeId", Venue::Okx)?;

            let trade = Trade::new(Venue::Okx, pair, price, size, ts, trade_id).map_err(|err| {
                CollectorError::ParseError {
                    venue: Venue::Okx,
                    message: frame.to_string(),
                    error: err.to_string(),
                }
            })?;
            trades.push(trade);
        }
        Ok(trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn feed() -> OkxFeed {
        OkxFeed::new(&Pair::BASE)
    }

    #[test]
    fn parses_trades_channel() {
        let frame = r#"{"arg":{"channel":"trades","instId":"ETH-USDT"},"data":[{"instId":"ETH-USDT","tradeId":"130639474","px":"2219.9","sz":"0.12","side":"buy","ts":"1630048897897"}]}"#;
        let trades = feed().parse_frame(frame).unwrap();
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.pair, Pair::EthUsd);
        assert_eq!(trade.price, dec!(2219.9));
        assert_eq!(trade.volume, dec!(0.12));
        assert_eq!(trade.event_time_ms, 1630048897897);
        assert_eq!(trade.venue_trade_id, "130639474");
    }

    #[test]
    fn multiple_entries_all_emitted() {
        let frame = r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","tradeId":"1","px":"42000","sz":"1","side":"buy","ts":"1630048897897"},{"instId":"BTC-USDT","tradeId":"2","px":"42001","sz":"2","side":"sell","ts":"1630048897900"}]}"#;
        let trades = feed().parse_frame(frame).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[1].venue_trade_id, "2");
    }

    #[test]
    fn ignores_subscription_event() {
        let frame = r#"{"event":"subscribe","arg":{"channel":"trades","instId":"BTC-USDT"}}"#;
        assert!(feed().parse_frame(frame).unwrap().is_empty());
    }

    #[test]
    fn subscribe_covers_each_symbol() {
        let messages = feed().subscribe_messages();
        let value: Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(value["op"], "subscribe");
        assert_eq!(value["args"].as_array().unwrap().len(), 3);
    }
}
