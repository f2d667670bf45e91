//! Input validation for the RPC surface
//!
//! Validation failures are values from the 4xxx family, never panics, and
//! bubble to the envelope unchanged.

use chrono::{DateTime, Utc};
use serde_json::Value;

use pv_types::{CoreError, Pair, Resolution};

/// Price-change lookback periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePeriod {
    Hours24,
    Days7,
    Days30,
    Custom,
}

impl ChangePeriod {
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "24hours" => Ok(Self::Hours24),
            "7days" => Ok(Self::Days7),
            "30days" => Ok(Self::Days30),
            "custom" => Ok(Self::Custom),
            other => Err(CoreError::InvalidPeriod {
                value: other.to_string(),
            }),
        }
    }

    /// Fixed lookback duration; `None` for custom.
    pub fn lookback(&self) -> Option<chrono::Duration> {
        match self {
            Self::Hours24 => Some(chrono::Duration::hours(24)),
            Self::Days7 => Some(chrono::Duration::days(7)),
            Self::Days30 => Some(chrono::Duration::days(30)),
            Self::Custom => None,
        }
    }
}

/// Extract a required string field from the input object.
pub fn require_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, CoreError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::InvalidParams {
            detail: format!("missing required field: {field}"),
        })
}

/// Parse the `pair` field against the closed set.
pub fn parse_pair(input: &Value) -> Result<Pair, CoreError> {
    require_str(input, "pair")?.parse()
}

/// Parse the `pairs` list: between 1 and 10 valid pair symbols.
pub fn parse_pairs(input: &Value) -> Result<Vec<Pair>, CoreError> {
    let list = input
        .get("pairs")
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::InvalidParams {
            detail: "missing required field: pairs".to_string(),
        })?;
    if list.is_empty() || list.len() > 10 {
        return Err(CoreError::InvalidParams {
            detail: format!("pairs must contain between 1 and 10 entries, got {}", list.len()),
        });
    }
    list.iter()
        .map(|entry| {
            entry
                .as_str()
                .ok_or_else(|| CoreError::InvalidParams {
                    detail: "pairs entries must be strings".to_string(),
                })?
                .parse()
        })
        .collect()
}

/// Parse the `interval` field into a candle resolution.
pub fn parse_interval(input: &Value) -> Result<Resolution, CoreError> {
    require_str(input, "interval")?.parse()
}

/// Parse an optional RFC 3339 timestamp field.
pub fn parse_timestamp(input: &Value, field: &str) -> Result<Option<DateTime<Utc>>, CoreError> {
    match input.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| CoreError::InvalidDateFormat {
                value: text.clone(),
            }),
        Some(other) => Err(CoreError::InvalidDateFormat {
            value: other.to_string(),
        }),
    }
}

/// Resolve a change period plus optional bounds into a concrete range.
///
/// Custom periods require `from`; an inverted range is rejected.
pub fn resolve_range(
    period: ChangePeriod,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), CoreError> {
    let (from, to) = match period.lookback() {
        Some(lookback) => {
            let to = to.unwrap_or(now);
            (from.unwrap_or(to - lookback), to)
        }
        None => {
            let from = from.ok_or(CoreError::InvalidParams {
                detail: "custom period requires from".to_string(),
            })?;
            (from, to.unwrap_or(now))
        }
    };
    if from >= to {
        return Err(CoreError::InvalidTimeRange {
            detail: format!("from ({from}) must be before to ({to})"),
        });
    }
    Ok((from, to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn pair_validation() {
        assert_eq!(parse_pair(&json!({"pair": "btc-usd"})).unwrap(), Pair::BtcUsd);
        let err = parse_pair(&json!({"pair": "doge-usd"})).unwrap_err();
        assert_eq!(err.code(), pv_types::ErrorCode::InvalidPair);
        let err = parse_pair(&json!({})).unwrap_err();
        assert_eq!(err.code(), pv_types::ErrorCode::InvalidParams);
    }

    #[test]
    fn pairs_bounds() {
        assert!(parse_pairs(&json!({"pairs": []})).is_err());
        let eleven: Vec<_> = std::iter::repeat("btc-usd").take(11).collect();
        assert!(parse_pairs(&json!({ "pairs": eleven })).is_err());
        let pairs = parse_pairs(&json!({"pairs": ["btc-usd", "eth-rub"]})).unwrap();
        assert_eq!(pairs, vec![Pair::BtcUsd, Pair::EthRub]);
    }

    #[test]
    fn custom_without_from_is_invalid_params() {
        let err =
            resolve_range(ChangePeriod::Custom, None, None, now()).unwrap_err();
        assert_eq!(err.code(), pv_types::ErrorCode::InvalidParams);
    }

    #[test]
    fn inverted_range_is_invalid_time_range() {
        let from = now();
        let to = from - chrono::Duration::hours(1);
        let err = resolve_range(ChangePeriod::Custom, Some(from), Some(to), now()).unwrap_err();
        assert_eq!(err.code(), pv_types::ErrorCode::InvalidTimeRange);
        // from == to is inverted too
        let err = resolve_range(ChangePeriod::Custom, Some(from), Some(from), now()).unwrap_err();
        assert_eq!(err.code(), pv_types::ErrorCode::InvalidTimeRange);
    }

    #[test]
    fn fixed_periods_anchor_to_now() {
        let (from, to) = resolve_range(ChangePeriod::Hours24, None, None, now()).unwrap();
        assert_eq!(to, now());
        assert_eq!(to - from, chrono::Duration::hours(24));
    }

    #[test]
    fn unknown_period_is_invalid_period() {
        let err = ChangePeriod::parse("fortnight").unwrap_err();
        assert_eq!(err.code(), pv_types::ErrorCode::InvalidPeriod);
    }

    #[test]
    fn bad_timestamp_is_invalid_date_format() {
        let err = parse_timestamp(&json!({"from": "yesterday"}), "from").unwrap_err();
        assert_eq!(err.code(), pv_types::ErrorCode::InvalidDateFormat);
        assert!(parse_timestamp(&json!({}), "from").unwrap().is_none());
        let t = parse_timestamp(&json!({"from": "2024-03-15T12:00:00Z"}), "from")
            .unwrap()
            .unwrap();
        assert_eq!(t, now());
    }
}
