//! Volume-weighted average price over a trade window
//!
//! Pure computation: the tick loop hands it whatever the buffer returned
//! for the window and it never looks at the clock. Trades are treated as
//! an unordered set; the sum is commutative, so cross-venue ordering does
//! not matter.

use rust_decimal::Decimal;

use pv_types::Trade;

/// Result of one VWAP computation.
#[derive(Debug, Clone, PartialEq)]
pub struct VwapOutcome {
    /// `Σ(price·volume) / Σ(volume)`
    pub price: Decimal,
    /// Distinct contributing venue names, insertion-ordered
    pub sources: Vec<String>,
    /// `Σ(volume)` across contributing trades
    pub volume: Decimal,
}

/// Compute the VWAP of a window.
///
/// Returns `None` for an empty window and for a window whose total volume
/// is zero; no price is emitted in either case, which is not an error.
/// Zero-volume trades contribute zero to both sums, so they never cause a
/// division by zero on their own.
pub fn compute_vwap(trades: &[Trade]) -> Option<VwapOutcome> {
    if trades.is_empty() {
        return None;
    }

    let mut weighted_sum = Decimal::ZERO;
    let mut volume_sum = Decimal::ZERO;
    let mut sources: Vec<String> = Vec::new();

    for trade in trades {
        weighted_sum += trade.price * trade.volume;
        volume_sum += trade.volume;
        let venue = trade.venue.as_str();
        if !sources.iter().any(|s| s == venue) {
            sources.push(venue.to_string());
        }
    }

    if volume_sum.is_zero() {
        return None;
    }

    Some(VwapOutcome {
        price: weighted_sum / volume_sum,
        sources,
        volume: volume_sum,
    })
}

/// Set union preserving insertion order: `base` first, `extra` appended
/// when absent. Used for the derived-pair `sources` list.
pub fn union_sources(base: &[String], extra: &str) -> Vec<String> {
    let mut sources = base.to_vec();
    if !sources.iter().any(|s| s == extra) {
        sources.push(extra.to_string());
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_types::{Pair, Venue};
    use rust_decimal_macros::dec;

    fn trade(venue: Venue, price: Decimal, volume: Decimal) -> Trade {
        Trade::new(venue, Pair::BtcUsd, price, volume, 1_700_000_000_000, "t").unwrap()
    }

    #[test]
    fn single_venue_single_trade() {
        let trades = vec![trade(Venue::Binance, dec!(45000), dec!(1))];
        let outcome = compute_vwap(&trades).unwrap();
        assert_eq!(outcome.price, dec!(45000));
        assert_eq!(outcome.volume, dec!(1));
        assert_eq!(outcome.sources, vec!["binance"]);
    }

    #[test]
    fn multi_trade_weighted_average() {
        let trades = vec![
            trade(Venue::Binance, dec!(45000), dec!(1)),
            trade(Venue::Kraken, dec!(45100), dec!(2)),
            trade(Venue::Coinbase, dec!(44900), dec!(1.5)),
        ];
        let outcome = compute_vwap(&trades).unwrap();
        // (45000·1 + 45100·2 + 44900·1.5) / 4.5 = 202550 / 4.5
        let expected = dec!(202550) / dec!(4.5);
        assert_eq!(outcome.price, expected);
        assert!((outcome.price - dec!(45011.11111111)).abs() < dec!(0.00000001));
        assert_eq!(outcome.volume, dec!(4.5));
        assert_eq!(outcome.sources, vec!["binance", "kraken", "coinbase"]);
    }

    #[test]
    fn same_venue_contributes_once_to_sources() {
        let trades = vec![
            trade(Venue::Binance, dec!(100), dec!(1)),
            trade(Venue::Binance, dec!(102), dec!(1)),
        ];
        let outcome = compute_vwap(&trades).unwrap();
        assert_eq!(outcome.sources.len(), 1);
        assert_eq!(outcome.price, dec!(101));
    }

    #[test]
    fn empty_window_emits_nothing() {
        assert!(compute_vwap(&[]).is_none());
    }

    #[test]
    fn zero_total_volume_emits_nothing() {
        let trades = vec![
            trade(Venue::Binance, dec!(100), dec!(0)),
            trade(Venue::Kraken, dec!(105), dec!(0)),
        ];
        assert!(compute_vwap(&trades).is_none());
    }

    #[test]
    fn zero_volume_trade_alongside_real_volume() {
        let trades = vec![
            trade(Venue::Binance, dec!(100), dec!(0)),
            trade(Venue::Kraken, dec!(105), dec!(2)),
        ];
        let outcome = compute_vwap(&trades).unwrap();
        // The zero-volume trade contributes nothing to either sum.
        assert_eq!(outcome.price, dec!(105));
        assert_eq!(outcome.volume, dec!(2));
        // ...but its venue still counts as a contributor.
        assert_eq!(outcome.sources, vec!["binance", "kraken"]);
    }

    #[test]
    fn computation_is_pure() {
        let window = vec![
            trade(Venue::Binance, dec!(45000), dec!(1)),
            trade(Venue::Kraken, dec!(45100), dec!(2)),
        ];
        let first = compute_vwap(&window).unwrap();
        // Trades appended elsewhere after emission do not change the
        // outcome of the original window.
        let mut extended = window.clone();
        extended.push(trade(Venue::Okx, dec!(50000), dec!(5)));
        let again = compute_vwap(&window).unwrap();
        assert_eq!(first, again);
        assert_ne!(compute_vwap(&extended).unwrap(), first);
    }

    #[test]
    fn union_appends_only_when_absent() {
        let base = vec!["binance".to_string(), "kraken".to_string()];
        assert_eq!(
            union_sources(&base, "cbr"),
            vec!["binance", "kraken", "cbr"]
        );
        let with_cbr = vec!["cbr".to_string()];
        assert_eq!(union_sources(&with_cbr, "cbr"), vec!["cbr"]);
    }
}
