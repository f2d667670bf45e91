//! Venue feed implementations
//!
//! Each feed knows one venue's wire format: where to connect, what to send
//! to subscribe, and how to turn an inbound frame into normalized trades.
//! The generic [`Collector`](crate::Collector) owns the connection loop;
//! feeds stay pure parsers apart from the KuCoin bullet handshake.

pub mod binance;
pub mod bybit;
pub mod coinbase;
pub mod kraken;
pub mod kucoin;
pub mod okx;

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use pv_types::{Trade, Venue};

use crate::error::{CollectorError, Result};
use crate::symbol_map::SymbolMap;

pub use binance::BinanceFeed;
pub use bybit::BybitFeed;
pub use coinbase::CoinbaseFeed;
pub use kraken::KrakenFeed;
pub use kucoin::KucoinFeed;
pub use okx::OkxFeed;

/// Everything the connection loop needs to open a session.
#[derive(Debug, Clone)]
pub struct ConnectSpec {
    /// WebSocket URL, possibly obtained through a pre-connect handshake
    pub url: String,
    /// Client-side keep-alive interval advertised by the venue
    pub ping_interval: Option<Duration>,
}

/// One venue's trade feed.
#[async_trait]
pub trait VenueFeed: Send + Sync + 'static {
    fn venue(&self) -> Venue;

    /// The fixed pair ↔ symbol map for this venue.
    fn symbols(&self) -> &SymbolMap;

    /// Resolve the connection target. KuCoin performs its bullet POST
    /// here; everyone else returns a static URL.
    async fn connect_spec(&self) -> Result<ConnectSpec>;

    /// Subscribe payloads to send once the socket is ready.
    fn subscribe_messages(&self) -> Vec<String>;

    /// Parse one inbound frame into zero or more trades. Control frames
    /// parse to an empty vec; malformed frames are an error the caller
    /// drops at debug level.
    fn parse_frame(&self, frame: &str) -> Result<Vec<Trade>>;

    /// An immediate reply the protocol demands for this frame (e.g. a
    /// KuCoin application-level pong).
    fn control_reply(&self, frame: &str) -> Option<String> {
        let _ = frame;
        None
    }

    /// Application-level keep-alive message, sent every
    /// [`ConnectSpec::ping_interval`].
    fn ping_message(&self) -> Option<String> {
        None
    }

    /// Whether a welcome frame must arrive before subscribing.
    fn requires_welcome(&self) -> bool {
        false
    }

    /// Recognize the welcome frame for venues that send one.
    fn is_welcome(&self, frame: &str) -> bool {
        let _ = frame;
        false
    }

    /// Recognize a subscribe acknowledgement.
    fn is_subscribe_ack(&self, frame: &str) -> bool {
        let _ = frame;
        false
    }
}

/// Read a decimal from a JSON field that may be a string or a number.
pub(crate) fn decimal_field(value: &Value, key: &str, venue: Venue) -> Result<Decimal> {
    let field = value.get(key).ok_or_else(|| CollectorError::ParseError {
        venue,
        message: value.to_string(),
        error: format!("missing field {key}"),
    })?;
    parse_decimal(field, venue)
}

/// Parse a JSON value into a decimal.
pub(crate) fn parse_decimal(field: &Value, venue: Venue) -> Result<Decimal> {
    let parsed = match field {
        Value::String(s) => s.parse::<Decimal>().ok(),
        Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| CollectorError::ParseError {
        venue,
        message: field.to_string(),
        error: "invalid decimal".to_string(),
    })
}

/// Read a string field.
pub(crate) fn str_field<'a>(value: &'a Value, key: &str, venue: Venue) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CollectorError::ParseError {
            venue,
            message: value.to_string(),
            error: format!("missing string field {key}"),
        })
}

/// Read an integer field that may arrive as a number or a numeric string.
pub(crate) fn i64_field(value: &Value, key: &str, venue: Venue) -> Result<i64> {
    let field = value.get(key).ok_or_else(|| CollectorError::ParseError {
        venue,
        message: value.to_string(),
        error: format!("missing field {key}"),
    })?;
    match field {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| CollectorError::ParseError {
        venue,
        message: field.to_string(),
        error: format!("invalid integer field {key}"),
    })
}
