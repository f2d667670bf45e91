//! Candle repository with offset and keyset pagination
//!
//! One table per resolution (`price_history_5min`, `price_history_1hour`,
//! `price_history_1day`), each with a unique `(pair, period_start)` index
//! so recomputation upserts are last-writer-wins. The keyset cursor is the
//! base64 of a boundary row's `period_start`; pages are fetched with
//! `limit + 1` rows to detect `has_more` without a second query.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use pv_types::{decode_cursor, encode_cursor, Candle, CoreError, Pair, Resolution};

use crate::{clamp_limit, db_error, SortOrder};

/// An offset-paginated page of candles.
#[derive(Debug, Clone)]
pub struct OffsetPage {
    pub rows: Vec<Candle>,
    /// Total candles for the pair at this resolution
    pub total: i64,
}

/// Query parameters for keyset pagination.
#[derive(Debug, Clone, Default)]
pub struct CursorQuery {
    pub limit: Option<i64>,
    /// Opaque boundary from a previous page
    pub cursor: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub order: SortOrder,
}

/// A keyset-paginated page of candles.
#[derive(Debug, Clone)]
pub struct CursorPage {
    pub rows: Vec<Candle>,
    pub next_cursor: Option<String>,
    pub previous_cursor: Option<String>,
    pub has_more: bool,
}

/// Repository over the three candle tables.
#[derive(Clone)]
pub struct CandleRepository {
    pool: PgPool,
}

impl CandleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // Table names come from the closed Resolution set, never from input.
    fn table(resolution: Resolution) -> String {
        format!("price_history_{}", resolution.as_str())
    }

    fn from_row(row: &PgRow) -> Result<Candle, CoreError> {
        let pair: String = row.try_get("pair").map_err(db_error)?;
        Ok(Candle {
            pair: pair.parse()?,
            period_start: row
                .try_get::<DateTime<Utc>, _>("period_start")
                .map_err(db_error)?,
            open: row.try_get::<Decimal, _>("open").map_err(db_error)?,
            high: row.try_get::<Decimal, _>("high").map_err(db_error)?,
            low: row.try_get::<Decimal, _>("low").map_err(db_error)?,
            close: row.try_get::<Decimal, _>("close").map_err(db_error)?,
            volume: row.try_get::<Decimal, _>("volume").map_err(db_error)?,
            vwap: row
                .try_get::<Option<Decimal>, _>("vwap")
                .map_err(db_error)?,
            trade_count: row.try_get::<i64, _>("trade_count").map_err(db_error)?,
        })
    }

    /// Upsert a candle by `(pair, period_start)`.
    pub async fn upsert(&self, resolution: Resolution, candle: &Candle) -> Result<(), CoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        self.upsert_tx(&mut conn, resolution, candle).await
    }

    /// Upsert through an open transaction, used by the roll-up so the read
    /// and the write commit together.
    pub async fn upsert_tx(
        &self,
        conn: &mut PgConnection,
        resolution: Resolution,
        candle: &Candle,
    ) -> Result<(), CoreError> {
        let query = format!(
            "INSERT INTO {} (pair, period_start, open, high, low, close, volume, vwap, trade_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (pair, period_start) DO UPDATE SET \
             open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
             close = EXCLUDED.close, volume = EXCLUDED.volume, vwap = EXCLUDED.vwap, \
             trade_count = EXCLUDED.trade_count",
            Self::table(resolution)
        );
        sqlx::query(&query)
            .bind(candle.pair.as_str())
            .bind(candle.period_start)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .bind(candle.vwap)
            .bind(candle.trade_count)
            .execute(conn)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Most recent candle for the pair.
    pub async fn latest(
        &self,
        resolution: Resolution,
        pair: Pair,
    ) -> Result<Option<Candle>, CoreError> {
        let query = format!(
            "SELECT pair, period_start, open, high, low, close, volume, vwap, trade_count \
             FROM {} WHERE pair = $1 ORDER BY period_start DESC LIMIT 1",
            Self::table(resolution)
        );
        let row = sqlx::query(&query)
            .bind(pair.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    /// Number of candles stored for the pair.
    pub async fn count(&self, resolution: Resolution, pair: Pair) -> Result<i64, CoreError> {
        let query = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE pair = $1",
            Self::table(resolution)
        );
        let row = sqlx::query(&query)
            .bind(pair.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        row.try_get::<i64, _>("n").map_err(db_error)
    }

    /// Delete candles older than `cutoff`, returning the count removed.
    pub async fn delete_older_than(
        &self,
        resolution: Resolution,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let query = format!(
            "DELETE FROM {} WHERE period_start < $1",
            Self::table(resolution)
        );
        let result = sqlx::query(&query)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    /// Offset pagination: a page of candles plus the total count.
    pub async fn get_with_offset(
        &self,
        resolution: Resolution,
        pair: Pair,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<OffsetPage, CoreError> {
        let limit = clamp_limit(limit);
        let query = format!(
            "SELECT pair, period_start, open, high, low, close, volume, vwap, trade_count \
             FROM {} WHERE pair = $1 ORDER BY period_start DESC LIMIT $2 OFFSET $3",
            Self::table(resolution)
        );
        let rows = sqlx::query(&query)
            .bind(pair.as_str())
            .bind(limit)
            .bind(offset.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let rows = rows
            .iter()
            .map(Self::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let total = self.count(resolution, pair).await?;
        Ok(OffsetPage { rows, total })
    }

    /// Keyset pagination over `period_start`.
    pub async fn get_with_cursor(
        &self,
        resolution: Resolution,
        pair: Pair,
        query: CursorQuery,
    ) -> Result<CursorPage, CoreError> {
        let limit = clamp_limit(query.limit);
        let cursor_boundary = query.cursor.as_deref().map(decode_cursor).transpose()?;

        let mut sql = format!(
            "SELECT pair, period_start, open, high, low, close, volume, vwap, trade_count \
             FROM {} WHERE pair = $1",
            Self::table(resolution)
        );
        let mut next_param = 2;
        if query.from.is_some() {
            sql.push_str(&format!(" AND period_start >= ${next_param}"));
            next_param += 1;
        }
        if query.to.is_some() {
            sql.push_str(&format!(" AND period_start <= ${next_param}"));
            next_param += 1;
        }
        if cursor_boundary.is_some() {
            // The cursor marks the last row of the previous page; keyset
            // continuation moves strictly past it in the sort direction.
            let comparison = match query.order {
                SortOrder::Desc => "<",
                SortOrder::Asc => ">",
            };
            sql.push_str(&format!(" AND period_start {comparison} ${next_param}"));
            next_param += 1;
        }
        sql.push_str(&format!(
            " ORDER BY period_start {} LIMIT ${next_param}",
            query.order.sql()
        ));

        let mut db_query = sqlx::query(&sql).bind(pair.as_str());
        if let Some(from) = query.from {
            db_query = db_query.bind(from);
        }
        if let Some(to) = query.to {
            db_query = db_query.bind(to);
        }
        if let Some(boundary) = cursor_boundary {
            db_query = db_query.bind(boundary);
        }
        db_query = db_query.bind(limit + 1);

        let fetched = db_query.fetch_all(&self.pool).await.map_err(db_error)?;
        let mut rows = fetched
            .iter()
            .map(Self::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let has_more = rows.len() as i64 > limit;
        let next_cursor = if has_more {
            let extra = rows.pop();
            extra.map(|candle| encode_cursor(candle.period_start))
        } else {
            None
        };
        let previous_cursor = match (&query.cursor, rows.first()) {
            (Some(_), Some(first)) => Some(encode_cursor(first.period_start)),
            _ => None,
        };

        Ok(CursorPage {
            rows,
            next_cursor,
            previous_cursor,
            has_more,
        })
    }
}
