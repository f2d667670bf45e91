//! KuCoin WebSocket trade feed
//!
//! KuCoin requires a two-phase handshake: POST the public bullet endpoint
//! to obtain `{endpoint, token, pingInterval}`, then open the socket at
//! `endpoint?token=…`. A `welcome` message must arrive before subscribing
//! and an `ack` follows each subscription. The session is kept alive by a
//! client ping at the advertised interval and by answering the server's
//! own application-level pings with a pong.
//!
//! ## Data Format Reference
//!
//! ```json
//! {
//!   "type": "message",
//!   "topic": "/market/match:BTC-USDT",
//!   "subject": "trade.l3match",
//!   "data": {
//!     "sequence": "1545896669145",
//!     "price": "0.08",
//!     "size": "0.011",
//!     "symbol": "BTC-USDT",
//!     "side": "buy",
//!     "time": "1545914149935808589",   // nanoseconds, string
//!     "tradeId": "5c24c5da03aa673885cd67aa"
//!   }
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use pv_types::{Pair, Trade, Venue};

use crate::error::{CollectorError, Result};
use crate::symbol_map::SymbolMap;

use super::{decimal_field, str_field, ConnectSpec, VenueFeed};

const BULLET_URL: &str = "https://api.kucoin.com/api/v1/bullet-public";

const SYMBOLS: [(Pair, &str); 3] = [
    (Pair::BtcUsd, "BTC-USDT"),
    (Pair::EthUsd, "ETH-USDT"),
    (Pair::XmrUsd, "XMR-USDT"),
];

pub struct KucoinFeed {
    symbols: SymbolMap,
    bullet_url: String,
    http: reqwest::Client,
}

impl KucoinFeed {
    pub fn new(pairs: &[Pair]) -> Self {
        Self {
            symbols: SymbolMap::new(&SYMBOLS, pairs),
            bullet_url: BULLET_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Override the bullet endpoint (tests, alternative deployments).
    pub fn with_bullet_url(mut self, url: impl Into<String>) -> Self {
        self.bullet_url = url.into();
        self
    }

    fn handshake_error(&self, reason: impl Into<String>) -> CollectorError {
        CollectorError::HandshakeFailed {
            venue: Venue::Kucoin,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl VenueFeed for KucoinFeed {
    fn venue(&self) -> Venue {
        Venue::Kucoin
    }

    fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    async fn connect_spec(&self) -> Result<ConnectSpec> {
        let response: Value = self
            .http
            .post(&self.bullet_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let data = response
            .get("data")
            .ok_or_else(|| self.handshake_error("bullet response missing data"))?;
        let token = str_field(data, "token", Venue::Kucoin)
            .map_err(|_| self.handshake_error("bullet response missing token"))?;
        let server = data
            .get("instanceServers")
            .and_then(Value::as_array)
            .and_then(|servers| servers.first())
            .ok_or_else(|| self.handshake_error("bullet response has no instance servers"))?;
        let endpoint = str_field(server, "endpoint", Venue::Kucoin)
            .map_err(|_| self.handshake_error("instance server missing endpoint"))?;
        let ping_interval_ms = server
            .get("pingInterval")
            .and_then(Value::as_u64)
            .unwrap_or(18_000);

        let connect_id = Uuid::new_v4().simple().to_string();
        Ok(ConnectSpec {
            url: format!("{endpoint}?token={token}&connectId={connect_id}"),
            ping_interval: Some(Duration::from_millis(ping_interval_ms)),
        })
    }

    fn subscribe_messages(&self) -> Vec<String> {
        let topic = format!("/market/match:{}", self.symbols.symbols().join(","));
        vec![json!({
            "id": Uuid::new_v4().simple().to_string(),
            "type": "subscribe",
            "topic": topic,
            "privateChannel": false,
            "response": true,
        })
        .to_string()]
    }

    fn parse_frame(&self, frame: &str) -> Result<Vec<Trade>> {
        let value: Value = serde_json::from_str(frame)?;

        if value.get("type").and_then(Value::as_str) != Some("message") {
            return Ok(Vec::new());
        }
        let Some(data) = value.get("data") else {
            return Ok(Vec::new());
        };

        let symbol = str_field(data, "symbol", Venue::Kucoin)?;
        let Some(pair) = self.symbols.pair_for(symbol) else {
            return Ok(Vec::new());
        };

        let price = decimal_field(data, "price", Venue::Kucoin)?;
        let size = decimal_field(data, "size", Venue::Kucoin)?;
        // Match time arrives as a nanosecond string.
        let time_ns: i64 = str_field(data, "time", Venue::Kucoin)?
            .parse()
            .map_err(|_| CollectorError::ParseError {
                venue: Venue::Kucoin,
                message: frame.to_string(),
                error: "invalid match time".to_string(),
            })?;
        let trade_id = str_field(data, "tradeId", Venue::Kucoin)?;

        let trade = Trade::new(
            Venue::Kucoin,
            pair,
            price,
            size,
            time_ns / 1_000_000,
            trade_id,
        )
        .map_err(|err| CollectorError::ParseError {
            venue: Venue::Kucoin,
            message: frame.to_string(),
            error: err.to_string(),
        })?;
        Ok(vec![trade])
    }

    fn control_reply(&self, frame: &str) -> Option<String> {
        let value: Value = serde_json::from_str(frame).ok()?;
        if value.get("type").and_then(Value::as_str) != Some("ping") {
            return None;
        }
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        Some(json!({ "id": id, "type": "pong" }).to_string())
    }

    fn ping_message(&self) -> Option<String> {
        Some(
            json!({
                "id": Uuid::new_v4().simple().to_string(),
                "type": "ping",
            })
            .to_string(),
        )
    }

    fn requires_welcome(&self) -> bool {
        true
    }

    fn is_welcome(&self, frame: &str) -> bool {
        serde_json::from_str::<Value>(frame)
            .ok()
            .and_then(|v| v.get("type").and_then(Value::as_str).map(|t| t == "welcome"))
            .unwrap_or(false)
    }

    fn is_subscribe_ack(&self, frame: &str) -> bool {
        serde_json::from_str::<Value>(frame)
            .ok()
            .and_then(|v| v.get("type").and_then(Value::as_str).map(|t| t == "ack"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn feed() -> KucoinFeed {
        KucoinFeed::new(&Pair::BASE)
    }

    #[test]
    fn parses_match_message() {
        let frame = r#"{"type":"message","topic":"/market/match:BTC-USDT","subject":"trade.l3match","data":{"sequence":"1545896669145","price":"42000.5","size":"0.011","symbol":"BTC-USDT","side":"buy","time":"1672515782000000000","tradeId":"5c24c5da03aa673885cd67aa"}}"#;
        let trades = feed().parse_frame(frame).unwrap();
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.pair, Pair::BtcUsd);
        assert_eq!(trade.price, dec!(42000.5));
        assert_eq!(trade.volume, dec!(0.011));
        assert_eq!(trade.event_time_ms, 1672515782000);
        assert_eq!(trade.venue_trade_id, "5c24c5da03aa673885cd67aa");
    }

    #[test]
    fn recognizes_welcome_and_ack() {
        let feed = feed();
        assert!(feed.is_welcome(r#"{"id":"abc","type":"welcome"}"#));
        assert!(!feed.is_welcome(r#"{"type":"ack"}"#));
        assert!(feed.is_subscribe_ack(r#"{"id":"abc","type":"ack"}"#));
        assert!(feed.requires_welcome());
    }

    #[test]
    fn answers_server_ping_with_pong() {
        let reply = feed().control_reply(r#"{"id":"12345","type":"ping"}"#).unwrap();
        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["type"], "pong");
        assert_eq!(value["id"], "12345");
        assert!(feed().control_reply(r#"{"type":"welcome"}"#).is_none());
    }

    #[test]
    fn subscribe_topic_lists_all_mapped_symbols() {
        let messages = feed().subscribe_messages();
        let value: Value = serde_json::from_str(&messages[0]).unwrap();
        let topic = value["topic"].as_str().unwrap();
        assert!(topic.starts_with("/market/match:"));
        assert!(topic.contains("BTC-USDT"));
        assert!(value["response"].as_bool().unwrap());
    }

    #[test]
    fn ignores_non_message_frames() {
        assert!(feed().parse_frame(r#"{"type":"welcome"}"#).unwrap().is_empty());
        assert!(feed().parse_frame(r#"{"type":"ack","id":"1"}"#).unwrap().is_empty());
    }
}
