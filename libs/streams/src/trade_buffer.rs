//! Per-pair trailing trade buffers
//!
//! One sorted set per pair under `buffer:{pair}`, scored by event time in
//! epoch milliseconds with the serialized trade as the member. Duplicates
//! across venues are intentional: every venue submits its own trades and
//! the aggregator deduplicates the *set of contributing venues*, never the
//! trades. Living in Redis lets the window survive aggregator restarts.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use pv_types::{CoreError, Pair, Trade};

use crate::redis_error;

/// Shared trailing-window buffer between aggregator ticks.
#[derive(Clone)]
pub struct TradeBuffer {
    conn: ConnectionManager,
}

impl TradeBuffer {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(pair: Pair) -> String {
        format!("buffer:{pair}")
    }

    /// Insert a trade with score = its event time.
    pub async fn insert(&self, trade: &Trade) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let member = serde_json::to_string(trade).map_err(|err| CoreError::Internal {
            detail: format!("trade serialization failed: {err}"),
        })?;
        conn.zadd(Self::key(trade.pair), member, trade.event_time_ms)
            .await
            .map_err(redis_error)
    }

    /// All buffered trades with event time in `[from_ms, to_ms]`,
    /// ascending. Members that no longer parse are skipped.
    pub async fn range(
        &self,
        pair: Pair,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Trade>, CoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrangebyscore(Self::key(pair), from_ms, to_ms)
            .await
            .map_err(redis_error)?;

        let mut trades = Vec::with_capacity(members.len());
        for member in members {
            match serde_json::from_str::<Trade>(&member) {
                Ok(trade) => trades.push(trade),
                Err(err) => {
                    tracing::debug!(pair = %pair, %err, "skipping unparseable buffer member");
                }
            }
        }
        Ok(trades)
    }

    /// Evict every trade with event time strictly before `cutoff_ms`.
    pub async fn evict_before(&self, pair: Pair, cutoff_ms: i64) -> Result<u64, CoreError> {
        let mut conn = self.conn.clone();
        conn.zrembyscore(Self::key(pair), "-inf", format!("({cutoff_ms}"))
            .await
            .map_err(redis_error)
    }

    /// Number of buffered trades for the pair.
    pub async fn len(&self, pair: Pair) -> Result<u64, CoreError> {
        let mut conn = self.conn.clone();
        conn.zcard(Self::key(pair)).await.map_err(redis_error)
    }
}
