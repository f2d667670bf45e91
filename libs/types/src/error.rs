//! Error taxonomy shared across the pipeline and the RPC boundary
//!
//! Codes are user-visible identifiers grouped into numeric classes:
//! 1xxx price, 2xxx chart, 3xxx exchange, 4xxx validation, 5xxx system,
//! 6xxx stream. Validation and not-found errors bubble to the RPC surface
//! unchanged; system errors are retried locally and rewritten to
//! `INTERNAL_ERROR` with no details before leaving the process.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// User-visible error code identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 1xxx price
    PairNotFound,
    PriceUnavailable,
    PriceStale,
    // 2xxx chart
    ChartDataNotFound,
    InvalidTimeRange,
    InvalidInterval,
    // 3xxx exchange
    ExchangeDisconnected,
    ExchangeRateLimited,
    ExchangeNotSupported,
    // 4xxx validation
    InvalidPair,
    InvalidPeriod,
    InvalidDateFormat,
    InvalidParams,
    // 5xxx system
    DatabaseError,
    RedisError,
    InternalError,
    ServiceUnavailable,
    // 6xxx stream
    StreamAborted,
    StreamTimeout,
}

impl ErrorCode {
    /// The wire identifier, e.g. `PAIR_NOT_FOUND`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PairNotFound => "PAIR_NOT_FOUND",
            ErrorCode::PriceUnavailable => "PRICE_UNAVAILABLE",
            ErrorCode::PriceStale => "PRICE_STALE",
            ErrorCode::ChartDataNotFound => "CHART_DATA_NOT_FOUND",
            ErrorCode::InvalidTimeRange => "INVALID_TIME_RANGE",
            ErrorCode::InvalidInterval => "INVALID_INTERVAL",
            ErrorCode::ExchangeDisconnected => "EXCHANGE_DISCONNECTED",
            ErrorCode::ExchangeRateLimited => "EXCHANGE_RATE_LIMITED",
            ErrorCode::ExchangeNotSupported => "EXCHANGE_NOT_SUPPORTED",
            ErrorCode::InvalidPair => "INVALID_PAIR",
            ErrorCode::InvalidPeriod => "INVALID_PERIOD",
            ErrorCode::InvalidDateFormat => "INVALID_DATE_FORMAT",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::RedisError => "REDIS_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::StreamAborted => "STREAM_ABORTED",
            ErrorCode::StreamTimeout => "STREAM_TIMEOUT",
        }
    }

    /// Numeric identifier within the class ranges.
    pub fn numeric(&self) -> u16 {
        match self {
            ErrorCode::PairNotFound => 1001,
            ErrorCode::PriceUnavailable => 1002,
            ErrorCode::PriceStale => 1003,
            ErrorCode::ChartDataNotFound => 2001,
            ErrorCode::InvalidTimeRange => 2002,
            ErrorCode::InvalidInterval => 2003,
            ErrorCode::ExchangeDisconnected => 3001,
            ErrorCode::ExchangeRateLimited => 3002,
            ErrorCode::ExchangeNotSupported => 3003,
            ErrorCode::InvalidPair => 4001,
            ErrorCode::InvalidPeriod => 4002,
            ErrorCode::InvalidDateFormat => 4003,
            ErrorCode::InvalidParams => 4004,
            ErrorCode::DatabaseError => 5001,
            ErrorCode::RedisError => 5002,
            ErrorCode::InternalError => 5003,
            ErrorCode::ServiceUnavailable => 5004,
            ErrorCode::StreamAborted => 6001,
            ErrorCode::StreamTimeout => 6002,
        }
    }
}

/// Main error type for pipeline and RPC operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    /// No canonical price has ever been recorded for the pair
    #[error("no price found for pair {pair}")]
    PairNotFound { pair: String },

    /// A price exists but could not be served
    #[error("price unavailable for pair {pair}")]
    PriceUnavailable { pair: String },

    /// The cached price is older than the staleness threshold
    #[error("cached price for {pair} is stale ({age_secs}s old)")]
    PriceStale { pair: String, age_secs: i64 },

    /// No candles exist for the requested range
    #[error("no chart data for pair {pair}")]
    ChartDataNotFound { pair: String },

    /// `from`/`to` do not form a valid range
    #[error("invalid time range: {detail}")]
    InvalidTimeRange { detail: String },

    /// Unknown candle interval
    #[error("invalid interval: {value}")]
    InvalidInterval { value: String },

    /// A venue connection is down
    #[error("exchange {venue} is disconnected")]
    ExchangeDisconnected { venue: String },

    /// A venue rejected us for request volume
    #[error("exchange {venue} rate limited the connection")]
    ExchangeRateLimited { venue: String },

    /// The venue name is not part of the supported set
    #[error("exchange not supported: {venue}")]
    ExchangeNotSupported { venue: String },

    /// The pair symbol is not part of the closed set
    #[error("invalid pair: {value}")]
    InvalidPair { value: String },

    /// Unknown price-change period
    #[error("invalid period: {value}")]
    InvalidPeriod { value: String },

    /// A timestamp failed RFC 3339 parsing
    #[error("invalid date format: {value}")]
    InvalidDateFormat { value: String },

    /// Generic input validation failure
    #[error("invalid parameters: {detail}")]
    InvalidParams { detail: String },

    /// Database operation failed
    #[error("database error: {detail}")]
    Database { detail: String },

    /// Redis operation failed
    #[error("redis error: {detail}")]
    Redis { detail: String },

    /// Unclassified internal failure
    #[error("internal error: {detail}")]
    Internal { detail: String },

    /// A dependency required to serve the request is down
    #[error("service unavailable: {detail}")]
    ServiceUnavailable { detail: String },

    /// The client aborted a price stream
    #[error("price stream aborted")]
    StreamAborted,

    /// A price stream saw no messages within the idle timeout
    #[error("price stream idle timeout")]
    StreamTimeout,
}

impl CoreError {
    /// The user-visible code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::PairNotFound { .. } => ErrorCode::PairNotFound,
            CoreError::PriceUnavailable { .. } => ErrorCode::PriceUnavailable,
            CoreError::PriceStale { .. } => ErrorCode::PriceStale,
            CoreError::ChartDataNotFound { .. } => ErrorCode::ChartDataNotFound,
            CoreError::InvalidTimeRange { .. } => ErrorCode::InvalidTimeRange,
            CoreError::InvalidInterval { .. } => ErrorCode::InvalidInterval,
            CoreError::ExchangeDisconnected { .. } => ErrorCode::ExchangeDisconnected,
            CoreError::ExchangeRateLimited { .. } => ErrorCode::ExchangeRateLimited,
            CoreError::ExchangeNotSupported { .. } => ErrorCode::ExchangeNotSupported,
            CoreError::InvalidPair { .. } => ErrorCode::InvalidPair,
            CoreError::InvalidPeriod { .. } => ErrorCode::InvalidPeriod,
            CoreError::InvalidDateFormat { .. } => ErrorCode::InvalidDateFormat,
            CoreError::InvalidParams { .. } => ErrorCode::InvalidParams,
            CoreError::Database { .. } => ErrorCode::DatabaseError,
            CoreError::Redis { .. } => ErrorCode::RedisError,
            CoreError::Internal { .. } => ErrorCode::InternalError,
            CoreError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            CoreError::StreamAborted => ErrorCode::StreamAborted,
            CoreError::StreamTimeout => ErrorCode::StreamTimeout,
        }
    }

    /// Whether a local retry with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Database { .. }
                | CoreError::Redis { .. }
                | CoreError::ServiceUnavailable { .. }
        )
    }

    /// The `(code, message)` pair safe to put on the wire.
    ///
    /// System-class errors (5xxx) are collapsed to `INTERNAL_ERROR` with a
    /// generic message; everything else passes through unchanged.
    pub fn public_parts(&self) -> (ErrorCode, String) {
        match self.code() {
            ErrorCode::DatabaseError
            | ErrorCode::RedisError
            | ErrorCode::InternalError
            | ErrorCode::ServiceUnavailable => {
                (ErrorCode::InternalError, "internal error".to_string())
            }
            code => (code, self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_their_classes() {
        assert_eq!(
            CoreError::PairNotFound { pair: "btc-usd".into() }.code().numeric() / 1000,
            1
        );
        assert_eq!(
            CoreError::InvalidPair { value: "x".into() }.code().numeric() / 1000,
            4
        );
        assert_eq!(CoreError::StreamTimeout.code().numeric() / 1000, 6);
    }

    #[test]
    fn system_errors_are_rewritten() {
        let err = CoreError::Database {
            detail: "connection refused on 10.0.0.5".into(),
        };
        let (code, message) = err.public_parts();
        assert_eq!(code, ErrorCode::InternalError);
        assert!(!message.contains("10.0.0.5"));
    }

    #[test]
    fn validation_errors_pass_through() {
        let err = CoreError::InvalidPeriod { value: "fortnight".into() };
        let (code, message) = err.public_parts();
        assert_eq!(code, ErrorCode::InvalidPeriod);
        assert!(message.contains("fortnight"));
    }

    #[test]
    fn transient_classification() {
        assert!(CoreError::Redis { detail: "timeout".into() }.is_transient());
        assert!(!CoreError::InvalidParams { detail: "bad".into() }.is_transient());
    }
}
