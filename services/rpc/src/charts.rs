//! ChartsService@2.0.0

use chrono::Utc;
use serde_json::{json, Value};

use pv_storage::{with_retry, CandleRepository, CursorQuery, SortOrder};
use pv_types::{Candle, CoreError};

use crate::validation::{
    parse_interval, parse_pair, parse_timestamp, require_str, resolve_range, ChangePeriod,
};

/// Largest candle page the RPC surface serves.
const MAX_CANDLE_LIMIT: i64 = 1000;

/// Read side of the candle history.
pub struct ChartsService {
    candles: CandleRepository,
}

impl ChartsService {
    pub fn new(candles: CandleRepository) -> Self {
        Self { candles }
    }

    /// Chart series for a period: ascending dates with aligned value and
    /// OHLCV arrays.
    pub async fn get_chart_data(&self, input: &Value) -> Result<Value, CoreError> {
        let pair = parse_pair(input)?;
        let period = ChangePeriod::parse(require_str(input, "period")?)?;
        let interval = parse_interval(input)?;
        let from = parse_timestamp(input, "from")?;
        let to = parse_timestamp(input, "to")?;
        let (from, to) = resolve_range(period, from, to, Utc::now())?;

        let page = with_retry("candles.get_with_cursor", || {
            self.candles.get_with_cursor(
                interval,
                pair,
                CursorQuery {
                    limit: Some(MAX_CANDLE_LIMIT),
                    cursor: None,
                    from: Some(from),
                    to: Some(to),
                    order: SortOrder::Asc,
                },
            )
        })
        .await?;

        if page.rows.is_empty() {
            return Err(CoreError::ChartDataNotFound {
                pair: pair.to_string(),
            });
        }

        let dates: Vec<String> = page
            .rows
            .iter()
            .map(|c| c.period_start.to_rfc3339())
            .collect();
        let series: Vec<_> = page.rows.iter().map(|c| c.close).collect();
        Ok(json!({
            "dates": dates,
            "series": series,
            "ohlcv": {
                "open": page.rows.iter().map(|c| c.open).collect::<Vec<_>>(),
                "high": page.rows.iter().map(|c| c.high).collect::<Vec<_>>(),
                "low": page.rows.iter().map(|c| c.low).collect::<Vec<_>>(),
                "close": page.rows.iter().map(|c| c.close).collect::<Vec<_>>(),
                "volume": page.rows.iter().map(|c| c.volume).collect::<Vec<_>>(),
            },
        }))
    }

    /// Offset-paginated raw candles.
    pub async fn get_ohlcv(&self, input: &Value) -> Result<Value, CoreError> {
        let pair = parse_pair(input)?;
        let interval = parse_interval(input)?;

        let limit = match input.get("limit") {
            None | Some(Value::Null) => MAX_CANDLE_LIMIT,
            Some(value) => value.as_i64().ok_or_else(|| CoreError::InvalidParams {
                detail: "limit must be an integer".to_string(),
            })?,
        };
        if limit < 1 || limit > MAX_CANDLE_LIMIT {
            return Err(CoreError::InvalidParams {
                detail: format!("limit must be between 1 and {MAX_CANDLE_LIMIT}"),
            });
        }
        let offset = match input.get("offset") {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_i64().ok_or_else(|| CoreError::InvalidParams {
                detail: "offset must be an integer".to_string(),
            })?,
        };
        if offset < 0 {
            return Err(CoreError::InvalidParams {
                detail: "offset must be non-negative".to_string(),
            });
        }

        let page = with_retry("candles.get_with_offset", || {
            self.candles.get_with_offset(interval, pair, Some(limit), offset)
        })
        .await?;
        Ok(json!({
            "candles": page.rows.iter().map(candle_json).collect::<Vec<_>>(),
            "pagination": {
                "total": page.total,
                "limit": limit,
                "offset": offset,
            },
        }))
    }
}

fn candle_json(candle: &Candle) -> Value {
    json!({
        "pair": candle.pair,
        "periodStart": candle.period_start.to_rfc3339(),
        "open": candle.open,
        "high": candle.high,
        "low": candle.low,
        "close": candle.close,
        "volume": candle.volume,
        "vwap": candle.vwap,
        "tradeCount": candle.trade_count,
    })
}
