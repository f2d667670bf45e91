//! Trading pair identifiers
//!
//! The pair universe is closed: three USD base pairs fed by venue trades and
//! three RUB pairs derived from them via the fiat rate. Derived pairs never
//! appear in venue subscriptions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A supported trading pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pair {
    /// Bitcoin / US dollar (base)
    BtcUsd,
    /// Ethereum / US dollar (base)
    EthUsd,
    /// Monero / US dollar (base)
    XmrUsd,
    /// Bitcoin / Russian rouble (derived)
    BtcRub,
    /// Ethereum / Russian rouble (derived)
    EthRub,
    /// Monero / Russian rouble (derived)
    XmrRub,
}

impl Pair {
    /// All pairs, base first.
    pub const ALL: [Pair; 6] = [
        Pair::BtcUsd,
        Pair::EthUsd,
        Pair::XmrUsd,
        Pair::BtcRub,
        Pair::EthRub,
        Pair::XmrRub,
    ];

    /// The USD pairs computed from venue trades.
    pub const BASE: [Pair; 3] = [Pair::BtcUsd, Pair::EthUsd, Pair::XmrUsd];

    /// Canonical kebab-case symbol, e.g. `btc-usd`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Pair::BtcUsd => "btc-usd",
            Pair::EthUsd => "eth-usd",
            Pair::XmrUsd => "xmr-usd",
            Pair::BtcRub => "btc-rub",
            Pair::EthRub => "eth-rub",
            Pair::XmrRub => "xmr-rub",
        }
    }

    /// Whether this pair is fed directly by venue trades.
    pub fn is_base(&self) -> bool {
        matches!(self, Pair::BtcUsd | Pair::EthUsd | Pair::XmrUsd)
    }

    /// The RUB pair derived from this base pair, if any.
    pub fn rub_counterpart(&self) -> Option<Pair> {
        match self {
            Pair::BtcUsd => Some(Pair::BtcRub),
            Pair::EthUsd => Some(Pair::EthRub),
            Pair::XmrUsd => Some(Pair::XmrRub),
            _ => None,
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pair {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "btc-usd" => Ok(Pair::BtcUsd),
            "eth-usd" => Ok(Pair::EthUsd),
            "xmr-usd" => Ok(Pair::XmrUsd),
            "btc-rub" => Ok(Pair::BtcRub),
            "eth-rub" => Ok(Pair::EthRub),
            "xmr-rub" => Ok(Pair::XmrRub),
            other => Err(CoreError::InvalidPair {
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_round_trip() {
        for pair in Pair::ALL {
            assert_eq!(pair.as_str().parse::<Pair>().unwrap(), pair);
        }
    }

    #[test]
    fn unknown_symbol_is_invalid_pair() {
        let err = "doge-usd".parse::<Pair>().unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidPair);
    }

    #[test]
    fn base_pairs_have_rub_counterparts() {
        assert_eq!(Pair::BtcUsd.rub_counterpart(), Some(Pair::BtcRub));
        assert_eq!(Pair::EthUsd.rub_counterpart(), Some(Pair::EthRub));
        assert_eq!(Pair::XmrUsd.rub_counterpart(), Some(Pair::XmrRub));
        assert_eq!(Pair::BtcRub.rub_counterpart(), None);
    }

    #[test]
    fn serde_uses_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Pair::BtcUsd).unwrap(),
            "\"btc-usd\""
        );
        let parsed: Pair = serde_json::from_str("\"xmr-rub\"").unwrap();
        assert_eq!(parsed, Pair::XmrRub);
    }
}
