//! Canonical price repository
//!
//! Raw VWAP rows in `price_history`, keyed by `(pair, event_time)`. Rows
//! are immutable once written; the OHLCV aggregator and the prices RPC only
//! read them. `sources` is stored as a JSON string so engines without
//! native array types accept the column unchanged; it is never queried
//! inside.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use pv_types::{CoreError, Pair, PriceRecord};

use crate::{clamp_limit, db_error, SortOrder};

/// Repository over the `price_history` table.
#[derive(Clone)]
pub struct PriceHistoryRepository {
    pool: PgPool,
}

impl PriceHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<PriceRecord, CoreError> {
        let pair: String = row.try_get("pair").map_err(db_error)?;
        let sources_json: String = row.try_get("sources").map_err(db_error)?;
        let sources: Vec<String> =
            serde_json::from_str(&sources_json).map_err(|err| CoreError::Database {
                detail: format!("unparseable sources column: {err}"),
            })?;
        Ok(PriceRecord {
            pair: pair.parse()?,
            price: row.try_get::<Decimal, _>("price").map_err(db_error)?,
            event_time: row
                .try_get::<DateTime<Utc>, _>("event_time")
                .map_err(db_error)?,
            method: row.try_get("method").map_err(db_error)?,
            sources,
            volume: row.try_get::<Decimal, _>("volume").map_err(db_error)?,
        })
    }

    /// Insert one canonical price row.
    pub async fn insert(&self, record: &PriceRecord) -> Result<(), CoreError> {
        let sources = serde_json::to_string(&record.sources).map_err(|err| CoreError::Internal {
            detail: format!("sources serialization failed: {err}"),
        })?;
        sqlx::query(
            "INSERT INTO price_history (pair, price, event_time, method, sources, volume) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.pair.as_str())
        .bind(record.price)
        .bind(record.event_time)
        .bind(&record.method)
        .bind(sources)
        .bind(record.volume)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    /// Insert a batch of rows in one round trip per row, inside a
    /// transaction so partial batches never become visible.
    pub async fn insert_many(&self, records: &[PriceRecord]) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for record in records {
            let sources =
                serde_json::to_string(&record.sources).map_err(|err| CoreError::Internal {
                    detail: format!("sources serialization failed: {err}"),
                })?;
            sqlx::query(
                "INSERT INTO price_history (pair, price, event_time, method, sources, volume) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(record.pair.as_str())
            .bind(record.price)
            .bind(record.event_time)
            .bind(&record.method)
            .bind(sources)
            .bind(record.volume)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)
    }

    /// Most recent row for the pair.
    pub async fn latest(&self, pair: Pair) -> Result<Option<PriceRecord>, CoreError> {
        let row = sqlx::query(
            "SELECT pair, price, event_time, method, sources, volume FROM price_history \
             WHERE pair = $1 ORDER BY event_time DESC LIMIT 1",
        )
        .bind(pair.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    /// Earliest row at or after `t`.
    pub async fn first_after(
        &self,
        pair: Pair,
        t: DateTime<Utc>,
    ) -> Result<Option<PriceRecord>, CoreError> {
        let row = sqlx::query(
            "SELECT pair, price, event_time, method, sources, volume FROM price_history \
             WHERE pair = $1 AND event_time >= $2 ORDER BY event_time ASC LIMIT 1",
        )
        .bind(pair.as_str())
        .bind(t)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    /// Latest row at or before `t`.
    pub async fn last_before(
        &self,
        pair: Pair,
        t: DateTime<Utc>,
    ) -> Result<Option<PriceRecord>, CoreError> {
        let row = sqlx::query(
            "SELECT pair, price, event_time, method, sources, volume FROM price_history \
             WHERE pair = $1 AND event_time <= $2 ORDER BY event_time DESC LIMIT 1",
        )
        .bind(pair.as_str())
        .bind(t)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    /// Rows with `event_time ∈ [from, to)`. The limit is clamped to the
    /// hard cap to bound memory on hostile ranges.
    pub async fn in_range(
        &self,
        pair: Pair,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<i64>,
        offset: i64,
        order: SortOrder,
    ) -> Result<Vec<PriceRecord>, CoreError> {
        let limit = clamp_limit(limit);
        let query = format!(
            "SELECT pair, price, event_time, method, sources, volume FROM price_history \
             WHERE pair = $1 AND event_time >= $2 AND event_time < $3 \
             ORDER BY event_time {} LIMIT $4 OFFSET $5",
            order.sql()
        );
        let rows = sqlx::query(&query)
            .bind(pair.as_str())
            .bind(from)
            .bind(to)
            .bind(limit)
            .bind(offset.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(Self::from_row).collect()
    }

    /// Same range read but through an open transaction, for the OHLCV
    /// roll-up which reads and upserts atomically.
    pub async fn in_range_tx(
        &self,
        conn: &mut PgConnection,
        pair: Pair,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<PriceRecord>, CoreError> {
        let limit = clamp_limit(limit);
        let rows = sqlx::query(
            "SELECT pair, price, event_time, method, sources, volume FROM price_history \
             WHERE pair = $1 AND event_time >= $2 AND event_time < $3 \
             ORDER BY event_time ASC LIMIT $4",
        )
        .bind(pair.as_str())
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(conn)
        .await
        .map_err(db_error)?;
        rows.iter().map(Self::from_row).collect()
    }

    /// Delete rows older than `cutoff`, returning the count removed.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM price_history WHERE event_time < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}
