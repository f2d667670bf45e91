//! # Priceverse Aggregation
//!
//! The trade-to-price core: the [`StreamAggregator`] turns the multiplexed
//! venue logs into one canonical VWAP price per base pair every tick and
//! derives the RUB pairs through the [`CbrRateSource`]; the
//! [`OhlcvAggregator`] rolls the persisted prices into candles on
//! wall-clock boundaries.

pub mod cbr;
pub mod ohlcv;
pub mod stream_aggregator;
pub mod vwap;

pub use cbr::CbrRateSource;
pub use ohlcv::{compute_candle, IntervalRun, OhlcvAggregator};
pub use stream_aggregator::{
    AggregatorConfig, AggregatorStats, StreamAggregator, CONSUMER_GROUP,
};
pub use vwap::{compute_vwap, union_sources, VwapOutcome};
