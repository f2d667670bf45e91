//! # Priceverse Collectors
//!
//! One supervised collector per venue, each holding a persistent WebSocket
//! session, normalizing venue-specific trade frames into [`pv_types::Trade`]
//! records and appending them to the venue's event log. Collectors never
//! touch the aggregation buffer; the stream aggregator consumes the logs
//! through its consumer group.
//!
//! ## Structure
//!
//! - [`Collector`]: the generic connection loop covering connect with a
//!   deadline, handshake and subscribe, the read loop, and reconnection
//!   with exponential backoff
//! - [`venues`]: the six [`VenueFeed`](venues::VenueFeed) implementations
//!   covering the wire-format variations (object frames keyed by
//!   `type`/`topic`/`arg.channel`, Kraken's positional arrays, KuCoin's
//!   bullet handshake with application-level ping/pong)
//! - [`ReconnectBreaker`]: circuit breaker guarding manual reconnects
//!
//! ## Failure semantics
//!
//! Parse errors never kill a connection; frames that do not normalize are
//! dropped at debug level. WebSocket errors increment the error counter
//! and trigger reconnection, never an RPC-visible error. A collector that
//! exhausts its reconnect budget stays down and reports unhealthy.

pub mod circuit_breaker;
pub mod collector;
pub mod error;
pub mod symbol_map;
pub mod venues;

pub use circuit_breaker::{BreakerConfig, BreakerState, ReconnectBreaker};
pub use collector::{Collector, CollectorConfig, CollectorHealth, CollectorStats};
pub use error::{CollectorError, Result};
pub use symbol_map::SymbolMap;
pub use venues::{
    BinanceFeed, BybitFeed, CoinbaseFeed, ConnectSpec, KrakenFeed, KucoinFeed, OkxFeed, VenueFeed,
};

use pv_streams::VenueLog;
use pv_types::{Pair, Venue};

/// Build the collector for one venue over the requested pairs.
///
/// The return type is erased behind a small enum so the composition root
/// can hold a uniform list without boxing the generic.
pub enum AnyCollector {
    Binance(Collector<BinanceFeed>),
    Coinbase(Collector<CoinbaseFeed>),
    Kraken(Collector<KrakenFeed>),
    Kucoin(Collector<KucoinFeed>),
    Okx(Collector<OkxFeed>),
    Bybit(Collector<BybitFeed>),
}

impl AnyCollector {
    pub fn build(
        venue: Venue,
        pairs: &[Pair],
        log: VenueLog,
        config: CollectorConfig,
    ) -> Result<Self> {
        match venue {
            Venue::Binance => Ok(Self::Binance(Collector::new(
                BinanceFeed::new(pairs),
                log,
                config,
            ))),
            Venue::Coinbase => Ok(Self::Coinbase(Collector::new(
                CoinbaseFeed::new(pairs),
                log,
                config,
            ))),
            Venue::Kraken => Ok(Self::Kraken(Collector::new(
                KrakenFeed::new(pairs),
                log,
                config,
            ))),
            Venue::Kucoin => Ok(Self::Kucoin(Collector::new(
                KucoinFeed::new(pairs),
                log,
                config,
            ))),
            Venue::Okx => Ok(Self::Okx(Collector::new(OkxFeed::new(pairs), log, config))),
            Venue::Bybit => Ok(Self::Bybit(Collector::new(
                BybitFeed::new(pairs),
                log,
                config,
            ))),
            Venue::Cbr => Err(CollectorError::Configuration(
                "cbr is a fiat-rate source, not a collectable venue".to_string(),
            )),
        }
    }

    pub fn venue(&self) -> Venue {
        match self {
            Self::Binance(c) => c.venue(),
            Self::Coinbase(c) => c.venue(),
            Self::Kraken(c) => c.venue(),
            Self::Kucoin(c) => c.venue(),
            Self::Okx(c) => c.venue(),
            Self::Bybit(c) => c.venue(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        match self {
            Self::Binance(c) => c.start().await,
            Self::Coinbase(c) => c.start().await,
            Self::Kraken(c) => c.start().await,
            Self::Kucoin(c) => c.start().await,
            Self::Okx(c) => c.start().await,
            Self::Bybit(c) => c.start().await,
        }
    }

    pub async fn stop(&self) -> Result<()> {
        match self {
            Self::Binance(c) => c.stop().await,
            Self::Coinbase(c) => c.stop().await,
            Self::Kraken(c) => c.stop().await,
            Self::Kucoin(c) => c.stop().await,
            Self::Okx(c) => c.stop().await,
            Self::Bybit(c) => c.stop().await,
        }
    }

    pub async fn reconnect(&self) -> Result<()> {
        match self {
            Self::Binance(c) => c.reconnect().await,
            Self::Coinbase(c) => c.reconnect().await,
            Self::Kraken(c) => c.reconnect().await,
            Self::Kucoin(c) => c.reconnect().await,
            Self::Okx(c) => c.reconnect().await,
            Self::Bybit(c) => c.reconnect().await,
        }
    }

    pub fn stats(&self) -> CollectorStats {
        match self {
            Self::Binance(c) => c.stats(),
            Self::Coinbase(c) => c.stats(),
            Self::Kraken(c) => c.stats(),
            Self::Kucoin(c) => c.stats(),
            Self::Okx(c) => c.stats(),
            Self::Bybit(c) => c.stats(),
        }
    }

    pub fn health_check(&self) -> CollectorHealth {
        match self {
            Self::Binance(c) => c.health_check(),
            Self::Coinbase(c) => c.health_check(),
            Self::Kraken(c) => c.health_check(),
            Self::Kucoin(c) => c.health_check(),
            Self::Okx(c) => c.health_check(),
            Self::Bybit(c) => c.health_check(),
        }
    }
}
