//! Sliding-window rate limiting over a shared sorted set
//!
//! Keys follow `ratelimit:{client}` or `ratelimit:{client}:{endpoint}`.
//! Each check trims entries older than the window, counts what remains and
//! either denies or records the request with a fresh TTL. The set is shared
//! across instances, so the limit holds fleet-wide. Transport errors fail
//! open: an unreachable store must not take the API down with it.

use chrono::Utc;
use redis::aio::ConnectionManager;

use pv_types::CoreError;

use crate::redis_error;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// Epoch milliseconds when the window resets
    pub reset_time_ms: i64,
    /// Suggested wait before retrying, milliseconds
    pub retry_after_ms: Option<u64>,
}

/// Per-client, per-endpoint sliding window limiter.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    conn: ConnectionManager,
    window_ms: u64,
    max_requests: u32,
}

impl SlidingWindowLimiter {
    /// Defaults per the API surface: 100 requests per 60s window.
    pub fn new(conn: ConnectionManager, window_ms: u64, max_requests: u32) -> Self {
        Self {
            conn,
            window_ms,
            max_requests,
        }
    }

    fn key(client: &str, endpoint: Option<&str>) -> String {
        match endpoint {
            Some(endpoint) => format!("ratelimit:{client}:{endpoint}"),
            None => format!("ratelimit:{client}"),
        }
    }

    /// Check and record one request for the client.
    pub async fn check(&self, client: &str, endpoint: Option<&str>) -> RateLimitDecision {
        match self.try_check(client, endpoint).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(client, %err, "rate limiter unavailable, failing open");
                RateLimitDecision {
                    allowed: true,
                    remaining: self.max_requests,
                    reset_time_ms: Utc::now().timestamp_millis() + self.window_ms as i64,
                    retry_after_ms: None,
                }
            }
        }
    }

    async fn try_check(
        &self,
        client: &str,
        endpoint: Option<&str>,
    ) -> Result<RateLimitDecision, CoreError> {
        let mut conn = self.conn.clone();
        let key = Self::key(client, endpoint);
        let now_ms = Utc::now().timestamp_millis();
        let window_start = now_ms - self.window_ms as i64;

        // Trim and count atomically so concurrent checks agree on the window.
        let (count,): (u32,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(format!("({window_start}"))
            .ignore()
            .cmd("ZCARD")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        if count >= self.max_requests {
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_time_ms: now_ms + self.window_ms as i64,
                retry_after_ms: Some(self.window_ms),
            });
        }

        // Record this request. The member carries a nonce so simultaneous
        // requests in the same millisecond both count.
        let member = format!("{now_ms}-{:08x}", rand::random::<u32>());
        let ttl_secs = self.window_ms / 1000 + 1;
        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&key)
            .arg(now_ms)
            .arg(member)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl_secs)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(redis_error)?;

        Ok(RateLimitDecision {
            allowed: true,
            remaining: self.max_requests - count - 1,
            reset_time_ms: now_ms + self.window_ms as i64,
            retry_after_ms: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        assert_eq!(
            SlidingWindowLimiter::key("10.1.2.3", None),
            "ratelimit:10.1.2.3"
        );
        assert_eq!(
            SlidingWindowLimiter::key("10.1.2.3", Some("getPrice")),
            "ratelimit:10.1.2.3:getPrice"
        );
    }
}
