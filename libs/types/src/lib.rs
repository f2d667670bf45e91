//! # Priceverse Shared Types
//!
//! Domain types shared by every Priceverse service: trading pairs, venues,
//! normalized trades, canonical prices, OHLCV candles, the fiat rate snapshot,
//! the user-visible error taxonomy and the keyset pagination cursor.
//!
//! Services depend on this crate instead of each other, so collectors, the
//! aggregators and the RPC surface can compile independently and collaborate
//! through these shapes alone.

pub mod candle;
pub mod cursor;
pub mod error;
pub mod fiat;
pub mod health;
pub mod pair;
pub mod price;
pub mod trade;
pub mod venue;

pub use candle::{Candle, Resolution};
pub use cursor::{decode_cursor, encode_cursor};
pub use error::{CoreError, ErrorCode, Result};
pub use fiat::{FiatRate, RateStatus};
pub use health::{aggregate_health, ComponentHealth, HealthLevel};
pub use pair::Pair;
pub use price::{PricePayload, PriceRecord, PRICE_METHOD_VWAP};
pub use trade::Trade;
pub use venue::Venue;
