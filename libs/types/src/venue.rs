//! Venue identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A trade source contributing to canonical prices.
///
/// The six exchanges feed base pairs over WebSocket; `Cbr` tags the Central
/// Bank fiat rate that derives RUB pairs and never produces trades itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Coinbase,
    Kraken,
    Kucoin,
    Okx,
    Bybit,
    /// Central Bank of Russia fiat-rate source
    Cbr,
}

impl Venue {
    /// The exchanges that run collectors.
    pub const EXCHANGES: [Venue; 6] = [
        Venue::Binance,
        Venue::Coinbase,
        Venue::Kraken,
        Venue::Kucoin,
        Venue::Okx,
        Venue::Bybit,
    ];

    /// Lowercase name used in stream keys, config and `sources` lists.
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Coinbase => "coinbase",
            Venue::Kraken => "kraken",
            Venue::Kucoin => "kucoin",
            Venue::Okx => "okx",
            Venue::Bybit => "bybit",
            Venue::Cbr => "cbr",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binance" => Ok(Venue::Binance),
            "coinbase" => Ok(Venue::Coinbase),
            "kraken" => Ok(Venue::Kraken),
            "kucoin" => Ok(Venue::Kucoin),
            "okx" => Ok(Venue::Okx),
            "bybit" => Ok(Venue::Bybit),
            "cbr" => Ok(Venue::Cbr),
            other => Err(CoreError::ExchangeNotSupported {
                venue: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trip() {
        for venue in Venue::EXCHANGES {
            assert_eq!(venue.as_str().parse::<Venue>().unwrap(), venue);
        }
        assert_eq!("cbr".parse::<Venue>().unwrap(), Venue::Cbr);
    }

    #[test]
    fn cbr_is_not_an_exchange() {
        assert!(!Venue::EXCHANGES.contains(&Venue::Cbr));
    }
}
