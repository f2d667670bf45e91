//! PricesService@2.0.0

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use pv_storage::{with_retry, PriceHistoryRepository};
use pv_streams::PriceCache;
use pv_types::{CoreError, Pair, PricePayload};

use crate::validation::{
    parse_pair, parse_pairs, parse_timestamp, require_str, resolve_range, ChangePeriod,
};

/// Read side of the canonical price series: cache first, database second.
pub struct PricesService {
    cache: PriceCache,
    prices: PriceHistoryRepository,
}

impl PricesService {
    pub fn new(cache: PriceCache, prices: PriceHistoryRepository) -> Self {
        Self { cache, prices }
    }

    /// Latest price for one pair. A stale cache entry counts as a miss and
    /// falls through to the database.
    pub async fn get_price(&self, input: &Value) -> Result<Value, CoreError> {
        let pair = parse_pair(input)?;
        let payload = self.lookup(pair).await?.ok_or_else(|| CoreError::PairNotFound {
            pair: pair.to_string(),
        })?;
        serde_json::to_value(&payload).map_err(|err| CoreError::Internal {
            detail: err.to_string(),
        })
    }

    /// Latest prices for up to ten pairs; pairs with no price are silently
    /// dropped from the result.
    pub async fn get_multiple_prices(&self, input: &Value) -> Result<Value, CoreError> {
        let pairs = parse_pairs(input)?;
        let mut results = Vec::with_capacity(pairs.len());
        for pair in pairs {
            if let Some(payload) = self.lookup(pair).await? {
                results.push(payload);
            }
        }
        serde_json::to_value(&results).map_err(|err| CoreError::Internal {
            detail: err.to_string(),
        })
    }

    /// Percentage change between the boundary prices of a period.
    pub async fn get_price_change(&self, input: &Value) -> Result<Value, CoreError> {
        let pair = parse_pair(input)?;
        let period = ChangePeriod::parse(require_str(input, "period")?)?;
        let from = parse_timestamp(input, "from")?;
        let to = parse_timestamp(input, "to")?;
        let (from, to) = resolve_range(period, from, to, Utc::now())?;

        let start = with_retry("price_history.first_after", || {
            self.prices.first_after(pair, from)
        })
        .await?;
        let end = with_retry("price_history.last_before", || {
            self.prices.last_before(pair, to)
        })
        .await?;
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(CoreError::PairNotFound {
                    pair: pair.to_string(),
                })
            }
        };

        let change_percent = if start.price.is_zero() {
            Decimal::ZERO
        } else {
            (end.price - start.price) / start.price * Decimal::from(100)
        };

        Ok(json!({
            "pair": pair,
            "startDate": start.event_time.to_rfc3339(),
            "endDate": end.event_time.to_rfc3339(),
            "startPrice": start.price,
            "endPrice": end.price,
            "changePercent": change_percent,
        }))
    }

    async fn lookup(&self, pair: Pair) -> Result<Option<PricePayload>, CoreError> {
        // Cache miss is not an error; stale entries already read as a miss.
        match self.cache.get(pair).await {
            Ok(Some(payload)) => return Ok(Some(payload)),
            Ok(None) => {}
            Err(err) => tracing::warn!(pair = %pair, %err, "price cache read failed, using database"),
        }
        let row = with_retry("price_history.latest", || self.prices.latest(pair)).await?;
        Ok(row.as_ref().map(PricePayload::from))
    }
}
