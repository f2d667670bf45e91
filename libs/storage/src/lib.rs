//! # Priceverse Storage
//!
//! Postgres repositories over the four history tables: `price_history`
//! (raw canonical prices) and `price_history_{5min,1hour,1day}` (candles).
//! Reference DDL lives in `schema.sql`; migration tooling is a separate
//! concern and stays outside this crate.
//!
//! Reads are range queries over `(pair, event_time)` / `(pair,
//! period_start)`; writes are inserts and idempotent upserts. Transient
//! failures go through [`retry::with_retry`] before surfacing.

pub mod candles;
pub mod price_history;
pub mod retry;

pub use candles::{CandleRepository, CursorPage, CursorQuery, OffsetPage};
pub use price_history::PriceHistoryRepository;
pub use retry::with_retry;

use pv_types::CoreError;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Row ordering for range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Hard cap on rows returned by any range read.
pub const MAX_RANGE_LIMIT: i64 = 10_000;
/// Default range read size when the caller does not specify one.
pub const DEFAULT_RANGE_LIMIT: i64 = 1_000;

/// Clamp a caller-supplied limit into `(0, MAX_RANGE_LIMIT]`.
pub(crate) fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(limit) if limit > 0 => limit.min(MAX_RANGE_LIMIT),
        _ => DEFAULT_RANGE_LIMIT,
    }
}

/// Open a connection pool with the configured bounds.
pub async fn connect_pool(
    url: &str,
    min_connections: u32,
    max_connections: u32,
) -> Result<PgPool, CoreError> {
    PgPoolOptions::new()
        .min_connections(min_connections)
        .max_connections(max_connections)
        .connect(url)
        .await
        .map_err(db_error)
}

/// Map an sqlx error into the shared taxonomy.
pub(crate) fn db_error(err: sqlx::Error) -> CoreError {
    CoreError::Database {
        detail: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamping() {
        assert_eq!(clamp_limit(None), DEFAULT_RANGE_LIMIT);
        assert_eq!(clamp_limit(Some(0)), DEFAULT_RANGE_LIMIT);
        assert_eq!(clamp_limit(Some(-5)), DEFAULT_RANGE_LIMIT);
        assert_eq!(clamp_limit(Some(50)), 50);
        assert_eq!(clamp_limit(Some(1_000_000)), MAX_RANGE_LIMIT);
    }
}
