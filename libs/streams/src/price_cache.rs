//! Canonical price cache and broadcast
//!
//! The aggregator is the single writer: each emitted price is SET under
//! `price:{pair}` with a short TTL and published on the pub/sub channel of
//! the same name. Readers treat entries older than the staleness threshold
//! as a miss, falling back to the database.

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use pv_types::{CoreError, Pair, PricePayload};

use crate::redis_error;

/// Pub/sub channel (and cache key) for a pair's canonical price.
pub fn price_channel(pair: Pair) -> String {
    format!("price:{pair}")
}

/// Write-through cache with pub/sub fan-out.
#[derive(Clone)]
pub struct PriceCache {
    conn: ConnectionManager,
    ttl_secs: u64,
    stale_after_secs: i64,
}

impl PriceCache {
    /// `ttl_secs` bounds the cache entry lifetime; `stale_after_secs` is
    /// the age beyond which a hit is treated as a miss.
    pub fn new(conn: ConnectionManager, ttl_secs: u64, stale_after_secs: u64) -> Self {
        Self {
            conn,
            ttl_secs,
            stale_after_secs: stale_after_secs as i64,
        }
    }

    /// Cache the payload and broadcast it to subscribers.
    pub async fn publish(&self, payload: &PricePayload) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let key = price_channel(payload.pair);
        let body = serde_json::to_string(payload).map_err(|err| CoreError::Internal {
            detail: format!("price payload serialization failed: {err}"),
        })?;

        conn.set_ex::<_, _, ()>(&key, &body, self.ttl_secs)
            .await
            .map_err(redis_error)?;
        conn.publish::<_, _, ()>(&key, &body)
            .await
            .map_err(redis_error)?;
        Ok(())
    }

    /// Fetch the cached price; stale or unparseable entries are a miss.
    pub async fn get(&self, pair: Pair) -> Result<Option<PricePayload>, CoreError> {
        let mut conn = self.conn.clone();
        let body: Option<String> = conn.get(price_channel(pair)).await.map_err(redis_error)?;

        let Some(body) = body else {
            return Ok(None);
        };
        let payload: PricePayload = match serde_json::from_str(&body) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(pair = %pair, %err, "unparseable cached price, treating as miss");
                return Ok(None);
            }
        };

        let age_secs = (Utc::now() - payload.timestamp).num_seconds();
        if age_secs > self.stale_after_secs {
            tracing::debug!(pair = %pair, age_secs, "cached price is stale, treating as miss");
            return Ok(None);
        }
        Ok(Some(payload))
    }
}
