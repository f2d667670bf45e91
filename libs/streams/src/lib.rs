//! # Priceverse Redis Surface
//!
//! Everything the pipeline shares through Redis lives here:
//!
//! - [`VenueLog`]: per-venue append-only trade streams with a consumer
//!   group cursor (collectors append, the aggregator reads and acks)
//! - [`TradeBuffer`]: per-pair sorted sets scored by event time, the
//!   aggregator's trailing VWAP window
//! - [`PriceCache`]: `price:{pair}` cache keys plus the pub/sub broadcast
//!   on channels of the same name
//! - [`SlidingWindowLimiter`]: per-client request limiting over a shared
//!   sorted set, failing open on transport errors
//!
//! All types hold a [`redis::aio::ConnectionManager`], which reconnects
//! transparently and is cheap to clone per call.

pub mod price_cache;
pub mod rate_limit;
pub mod trade_buffer;
pub mod venue_log;

pub use price_cache::{price_channel, PriceCache};
pub use rate_limit::{RateLimitDecision, SlidingWindowLimiter};
pub use trade_buffer::TradeBuffer;
pub use venue_log::{LogEntry, VenueLog};

use pv_types::CoreError;

/// Open a managed connection to the given Redis URL.
pub async fn connect(url: &str) -> Result<redis::aio::ConnectionManager, CoreError> {
    let client = redis::Client::open(url).map_err(redis_error)?;
    redis::aio::ConnectionManager::new(client)
        .await
        .map_err(redis_error)
}

/// Map a redis transport error into the shared taxonomy.
pub(crate) fn redis_error(err: redis::RedisError) -> CoreError {
    CoreError::Redis {
        detail: err.to_string(),
    }
}
