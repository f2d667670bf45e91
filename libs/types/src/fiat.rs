//! Fiat-rate snapshot shared between the CBR fetcher and its readers

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Freshness of the current USD→RUB rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateStatus {
    /// Fetched within the cache TTL
    Fresh,
    /// Last fetch succeeded but is older than 2× the cache TTL
    Stale,
    /// The source has never succeeded in this process
    Fallback,
}

/// The latest known fiat rate with its provenance.
///
/// Single writer (the CBR fetcher), many readers. Readers must tolerate
/// stale and fallback values without blocking; derived RUB prices are still
/// emitted as long as the rate is positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiatRate {
    /// USD→RUB multiplier, strictly positive
    pub rate: Decimal,
    /// Wall clock of the last successful fetch; `None` under fallback
    pub fetched_at: Option<DateTime<Utc>>,
    pub status: RateStatus,
    /// Fetch failures since the last success
    pub consecutive_failures: u32,
}

impl FiatRate {
    /// A fallback snapshot for processes that have never reached the source.
    pub fn fallback(rate: Decimal) -> Self {
        Self {
            rate,
            fetched_at: None,
            status: RateStatus::Fallback,
            consecutive_failures: 0,
        }
    }

    /// Whether readers should consider this rate usable for derivation.
    pub fn is_usable(&self) -> bool {
        self.rate > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fallback_is_usable_when_positive() {
        assert!(FiatRate::fallback(dec!(90)).is_usable());
        assert!(!FiatRate::fallback(dec!(0)).is_usable());
    }
}
