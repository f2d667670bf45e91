//! OHLCV roll-up from canonical prices
//!
//! On each wall-clock boundary the aggregator recomputes the candle for
//! the period that just closed, per pair and resolution, from the
//! canonical price history. The read and the upsert share one
//! READ-COMMITTED transaction, and the computation is idempotent: the same
//! source rows always produce the same candle.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use pv_storage::{CandleRepository, PriceHistoryRepository};
use pv_types::{Candle, CoreError, Pair, PriceRecord, Resolution};

/// Hard cap on source rows per candle to bound memory.
const MAX_SOURCE_ROWS: i64 = 10_000;

/// Per-resolution run bookkeeping exposed for health.
#[derive(Debug, Clone, Serialize)]
pub struct IntervalRun {
    pub last_run: DateTime<Utc>,
    /// Pairs that produced a candle on the last run
    pub processed: usize,
}

/// The candle roll-up worker. Pure compute: scheduling lives with the
/// schedule registry, which calls [`run_resolution`](Self::run_resolution)
/// at each boundary.
pub struct OhlcvAggregator {
    pool: PgPool,
    prices: PriceHistoryRepository,
    candles: CandleRepository,
    pairs: Vec<Pair>,
    runs: RwLock<HashMap<Resolution, IntervalRun>>,
}

impl OhlcvAggregator {
    pub fn new(
        pool: PgPool,
        prices: PriceHistoryRepository,
        candles: CandleRepository,
        pairs: Vec<Pair>,
    ) -> Self {
        Self {
            pool,
            prices,
            candles,
            pairs,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// The just-closed period for a resolution at wall-clock `now`.
    pub fn closed_period(resolution: Resolution, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = resolution.period_start_for(now);
        (end - resolution.duration(), end)
    }

    /// Roll up every pair for the period that closed at `now`. Pair
    /// failures are isolated; the run reports how many candles landed.
    pub async fn run_resolution(
        &self,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let (period_start, period_end) = Self::closed_period(resolution, now);
        debug!(
            resolution = %resolution,
            %period_start,
            %period_end,
            "rolling up candles"
        );

        let mut processed = 0;
        for pair in self.pairs.clone() {
            match self
                .roll_up_pair(resolution, pair, period_start, period_end)
                .await
            {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(resolution = %resolution, pair = %pair, %err, "candle roll-up failed for pair");
                }
            }
        }

        self.runs.write().await.insert(
            resolution,
            IntervalRun {
                last_run: now,
                processed,
            },
        );
        info!(resolution = %resolution, processed, "candle roll-up complete");
        Ok(processed)
    }

    /// Returns whether a candle was written (false = empty period).
    async fn roll_up_pair(
        &self,
        resolution: Resolution,
        pair: Pair,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await.map_err(|err| CoreError::Database {
            detail: err.to_string(),
        })?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await
            .map_err(|err| CoreError::Database {
                detail: err.to_string(),
            })?;

        let rows = self
            .prices
            .in_range_tx(&mut tx, pair, period_start, period_end, Some(MAX_SOURCE_ROWS))
            .await?;
        if rows.is_empty() {
            return Ok(false);
        }

        let candle = compute_candle(pair, period_start, &rows)?;
        self.candles.upsert_tx(&mut tx, resolution, &candle).await?;
        tx.commit().await.map_err(|err| CoreError::Database {
            detail: err.to_string(),
        })?;
        Ok(true)
    }

    /// Last-run bookkeeping per resolution.
    pub async fn runs(&self) -> HashMap<Resolution, IntervalRun> {
        self.runs.read().await.clone()
    }
}

/// Assemble one candle from ascending price rows.
///
/// `vwap` is volume-weighted when the period recorded volume; otherwise it
/// falls back to the arithmetic mean of open and close, so candles remain
/// usable when volume is unrecorded.
pub fn compute_candle(
    pair: Pair,
    period_start: DateTime<Utc>,
    rows: &[PriceRecord],
) -> Result<Candle, CoreError> {
    let first = rows.first().ok_or_else(|| CoreError::Internal {
        detail: "compute_candle called with no rows".to_string(),
    })?;
    let last = rows.last().ok_or_else(|| CoreError::Internal {
        detail: "compute_candle called with no rows".to_string(),
    })?;

    let mut high = first.price;
    let mut low = first.price;
    let mut volume = Decimal::ZERO;
    let mut weighted = Decimal::ZERO;
    for row in rows {
        high = high.max(row.price);
        low = low.min(row.price);
        volume += row.volume;
        weighted += row.price * row.volume;
    }

    let vwap = if volume > Decimal::ZERO {
        Some(weighted / volume)
    } else {
        Some((first.price + last.price) / Decimal::from(2))
    };

    let candle = Candle {
        pair,
        period_start,
        open: first.price,
        high,
        low,
        close: last.price,
        volume,
        vwap,
        trade_count: rows.len() as i64,
    };
    candle.validate()?;
    Ok(candle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pv_types::PRICE_METHOD_VWAP;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, h, m, 0).unwrap()
    }

    fn row(t: DateTime<Utc>, price: Decimal, volume: Decimal) -> PriceRecord {
        PriceRecord {
            pair: Pair::BtcUsd,
            price,
            event_time: t,
            method: PRICE_METHOD_VWAP.to_string(),
            sources: vec!["binance".to_string()],
            volume,
        }
    }

    #[test]
    fn candle_from_three_prices() {
        let start = at(10, 0);
        let rows = vec![
            row(start, dec!(100), dec!(1)),
            row(at(10, 1), dec!(110), dec!(2)),
            row(at(10, 2), dec!(105), dec!(1)),
        ];
        let candle = compute_candle(Pair::BtcUsd, start, &rows).unwrap();
        assert_eq!(candle.open, dec!(100));
        assert_eq!(candle.high, dec!(110));
        assert_eq!(candle.low, dec!(100));
        assert_eq!(candle.close, dec!(105));
        assert_eq!(candle.volume, dec!(4));
        // (100·1 + 110·2 + 105·1) / 4 = 425 / 4
        assert_eq!(candle.vwap, Some(dec!(106.25)));
        assert_eq!(candle.trade_count, 3);
    }

    #[test]
    fn zero_volume_falls_back_to_open_close_mean() {
        let start = at(10, 0);
        let rows = vec![
            row(start, dec!(100), dec!(0)),
            row(at(10, 3), dec!(120), dec!(0)),
        ];
        let candle = compute_candle(Pair::BtcUsd, start, &rows).unwrap();
        assert_eq!(candle.volume, dec!(0));
        assert_eq!(candle.vwap, Some(dec!(110)));
        assert!(candle.validate().is_ok());
    }

    #[test]
    fn recomputation_is_idempotent() {
        let start = at(10, 0);
        let rows = vec![
            row(start, dec!(100), dec!(1)),
            row(at(10, 1), dec!(110), dec!(2)),
        ];
        let first = compute_candle(Pair::BtcUsd, start, &rows).unwrap();
        let second = compute_candle(Pair::BtcUsd, start, &rows).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn single_row_candle_is_flat() {
        let start = at(10, 0);
        let rows = vec![row(start, dec!(100), dec!(1))];
        let candle = compute_candle(Pair::BtcUsd, start, &rows).unwrap();
        assert_eq!(candle.open, candle.close);
        assert_eq!(candle.high, candle.low);
        assert_eq!(candle.vwap, Some(dec!(100)));
    }

    #[test]
    fn closed_period_is_the_block_that_just_ended() {
        let now = at(10, 17);
        let (start, end) = OhlcvAggregator::closed_period(Resolution::FiveMin, now);
        assert_eq!(start, at(10, 10));
        assert_eq!(end, at(10, 15));

        let boundary = at(11, 0);
        let (start, end) = OhlcvAggregator::closed_period(Resolution::OneHour, boundary);
        assert_eq!(start, at(10, 0));
        assert_eq!(end, at(11, 0));

        let (start, end) = OhlcvAggregator::closed_period(Resolution::OneDay, at(0, 0));
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());
    }
}
