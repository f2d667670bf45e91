//! Bybit WebSocket trade feed
//!
//! Object frames keyed by `topic` with a `data` array.
//!
//! ## Data Format Reference
//!
//! ```json
//! {
//!   "topic": "publicTrade.BTCUSDT",
//!   "type": "snapshot",
//!   "ts": 1672304486868,
//!   "data": [
//!     {
//!       "T": 1672304486865,       // Trade time (ms)
//!       "s": "BTCUSDT",           // Symbol
//!       "S": "Buy",               // Side
//!       "v": "0.001",             // Volume (string)
//!       "p": "16578.50",          // Price (string)
//!       "i": "20f43950-d8dd-5b31-9112-a178eb6023af"
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

const WEBSOCKET_URL: &str = "wss://stream.bybit.com/v5/public/spot";

const SYMBOLS: [(Pair, &str); 3] = [
    (Pair::BtcUsd, "BTCUSDT"),
    (Pair::EthUsd, "ETHUSDT"),
    (Pair::XmrUsd, "XMRUSDT"),
];

const TRADE_TOPIC_PREFIX: &str = "publicTrade.";

pub struct BybitFeed {
    symbols: SymbolMap,
}

impl BybitFeed {
    pub fn new(pairs: &[Pair]) -> Self {
        Self {
            symbols: SymbolMap::new(&SYMBOLS, pairs),
        }
    }
}

#[async_trait]
impl VenueFeed for BybitFeed {
    fn venue(&self) -> Venue {
        Venue::Bybit
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
        let args: Vec<String> = self
            .symbols
            .symbols()
            .iter()
            .map(|symbol| format!("{TRADE_TOPIC_PREFIX}{symbol}"))
            .collect();
        vec![json!({ "op": "subscribe", "args": args }).to_string()]
    }

    fn parse_frame(&self, frame: &str) -> Result<Vec<Trade>> {
        let value: Value = serde_json::from_str(frame)?;

        let topic = value.get("topic").and_then(Value::as_str).unwrap_or_default();
        if !topic.starts_with(TRADE_TOPIC_PREFIX) {
            // Subscription responses carry `op`/`success` instead of a topic.
            return Ok(Vec::new());
        }
        let Some(data) = value.get("data").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        let mut trades = Vec::with_capacity(data.len());
        for entry in data {
            let symbol = str_field(entry, "s", Venue::Bybit)?;
            let Some(pair) = self.symbols.pair_for(symbol) else {
                continue;
            };
            let price = decimal_field(entry, "p", Venue::Bybit)?;
            let volume = decimal_field(entry, "v", Venue::Bybit)?;
            let trade_time = i64_field(entry, "T", Venue::Bybit)?;
            let trade_id = str_field(entry, "i", Venue::Bybit)?;

            let trade = Trade::new(Venue::Bybit, pair, price, volume, trade_time, trade_id)
                .map_err(|err| CollectorError::ParseError {
                    venue: Venue::Bybit,
                    message: frame.to_string(),
                    error: err.to_string(),
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

    fn feed() -> BybitFeed {
        BybitFeed::new(&Pair::BASE)
    }

    #[test]
    fn parses_public_trade_topic() {
        let frame = r#"{"topic":"publicTrade.BTCUSDT","type":"snapshot","ts":1672304486868,"data":[{"T":1672304486865,"s":"BTCUSDT","S":"Buy","v":"0.001","p":"16578.50","i":"20f43950-d8dd-5b31-9112-a178eb6023af"}]}"#;
        let trades = feed().parse_frame(frame).unwrap();
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.pair, Pair::BtcUsd);
        assert_eq!(trade.price, dec!(16578.50));
        assert_eq!(trade.volume, dec!(0.001));
        assert_eq!(trade.event_time_ms, 1672304486865);
        assert_eq!(trade.venue_trade_id, "20f43950-d8dd-5b31-9112-a178eb6023af");
    }

    #[test]
    fn ignores_subscription_response() {
        let frame = r#"{"success":true,"ret_msg":"subscribe","op":"subscribe","conn_id":"abc"}"#;
        assert!(feed().parse_frame(frame).unwrap().is_empty());
    }

    #[test]
    fn subscribe_builds_topics() {
        let messages = feed().subscribe_messages();
        assert!(messages[0].contains("publicTrade.BTCUSDT"));
        assert!(messages[0].contains("publicTrade.XMRUSDT"));
    }
}
