//! Pair ↔ venue-symbol mapping
//!
//! Each venue feed carries a fixed map from normalized pairs to the
//! venue's own symbols (e.g. `btc-usd` → `BTCUSDT`). A pair absent from a
//! venue's map means that venue does not contribute to it: Coinbase has
//! no `xmr-usd` and that absence is a feature, not an error.

use std::collections::HashMap;

use pv_types::Pair;

/// Fixed bidirectional symbol map for one venue.
#[derive(Debug, Clone)]
pub struct SymbolMap {
    forward: HashMap<Pair, String>,
    reverse: HashMap<String, Pair>,
}

impl SymbolMap {
    /// Build from `(pair, venue symbol)` entries, keeping only the pairs
    /// the caller asked to collect.
    pub fn new(entries: &[(Pair, &str)], requested: &[Pair]) -> Self {
        let mut forward = HashMap::new();
        let mut reverse = HashMap::new();
        for (pair, symbol) in entries {
            if !requested.contains(pair) {
                continue;
            }
            forward.insert(*pair, symbol.to_string());
            reverse.insert(symbol.to_string(), *pair);
        }
        Self { forward, reverse }
    }

    /// Venue symbol for a pair, if the venue serves it.
    pub fn venue_symbol(&self, pair: Pair) -> Option<&str> {
        self.forward.get(&pair).map(String::as_str)
    }

    /// Reverse lookup from a venue symbol.
    pub fn pair_for(&self, symbol: &str) -> Option<Pair> {
        self.reverse.get(symbol).copied()
    }

    /// Pairs this venue contributes to.
    pub fn pairs(&self) -> Vec<Pair> {
        self.forward.keys().copied().collect()
    }

    /// Venue symbols to subscribe to.
    pub fn symbols(&self) -> Vec<&str> {
        self.forward.values().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_lookup_round_trips() {
        let map = SymbolMap::new(
            &[(Pair::BtcUsd, "BTCUSDT"), (Pair::EthUsd, "ETHUSDT")],
            &Pair::BASE,
        );
        assert_eq!(map.venue_symbol(Pair::BtcUsd), Some("BTCUSDT"));
        assert_eq!(map.pair_for("ETHUSDT"), Some(Pair::EthUsd));
        assert_eq!(map.pair_for("DOGEUSDT"), None);
    }

    #[test]
    fn absent_pair_is_not_an_error() {
        let map = SymbolMap::new(&[(Pair::BtcUsd, "BTC-USD")], &Pair::BASE);
        assert_eq!(map.venue_symbol(Pair::XmrUsd), None);
    }

    #[test]
    fn requested_subset_filters_the_map() {
        let map = SymbolMap::new(
            &[(Pair::BtcUsd, "BTCUSDT"), (Pair::EthUsd, "ETHUSDT")],
            &[Pair::BtcUsd],
        );
        assert_eq!(map.venue_symbol(Pair::EthUsd), None);
        assert_eq!(map.pairs(), vec![Pair::BtcUsd]);
    }
}
