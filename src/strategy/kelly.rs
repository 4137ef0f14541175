//! Kelly criterion stake sizing.
//!
//! Turns the fractional Kelly share of an `Edge` into a stake in bankroll
//! units, capped at the configured maximum and dropped below the minimum.

use rust_decimal::prelude::*;
use serde::Serialize;
use tracing::debug;

use super::edge::Edge;
use crate::config::StakingConfig;

/// Sized stake recommendation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizedBet {
    pub edge: Edge,
    /// Stake in bankroll units, rounded to cents of a unit.
    pub stake_units: Decimal,
    /// Whether the stake was cut to `max_stake_units`.
    pub capped: bool,
}

#[derive(Debug, Clone)]
pub struct KellyCalculator {
    config: StakingConfig,
}

impl KellyCalculator {
    pub fn new(config: StakingConfig) -> Self {
        Self { config }
    }

    /// Size a bet. Returns `None` without a positive edge, when Kelly is zero
    /// or when the stake would be below `min_stake_units`.
    pub fn size_bet(&self, edge: &Edge) -> Option<SizedBet> {
        if !edge.is_positive() || edge.kelly_fraction <= 0.0 || self.config.bankroll_units <= 0.0 {
            debug!(key = %edge.key, kelly = edge.kelly_fraction, "Zero Kelly, no stake");
            return None;
        }

        let raw = edge.kelly_fraction * self.config.bankroll_units;
        let capped = raw > self.config.max_stake_units;
        let units = raw.min(self.config.max_stake_units);

        if units < self.config.min_stake_units {
            debug!(
                key = %edge.key,
                units,
                min = self.config.min_stake_units,
                "Stake below minimum"
            );
            return None;
        }

        let stake_units = Decimal::from_f64(units)?.round_dp(2);
        debug!(
            key = %edge.key,
            raw_units = format!("{raw:.3}"),
            stake = %stake_units,
            capped,
            "Bet sized"
        );

        Some(SizedBet {
            edge: edge.clone(),
            stake_units,
            capped,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketKey, MarketKind};
    use rust_decimal_macros::dec;

    fn edge(p: f64, price: f64, multiplier: f64) -> Edge {
        Edge::measure(&MarketKey::new("g1", MarketKind::Spread, "A"), p, price, multiplier).unwrap()
    }

    fn calc() -> KellyCalculator {
        KellyCalculator::new(StakingConfig::default())
    }

    #[test]
    fn test_quarter_kelly_stake() {
        // 5% of a 100-unit bankroll is 5 units, capped at 3.
        let bet = calc().size_bet(&edge(0.6, 2.0, 0.25)).unwrap();
        assert_eq!(bet.stake_units, dec!(3.00));
        assert!(bet.capped);
    }

    #[test]
    fn test_uncapped_stake() {
        // raw Kelly (0.55·0.91 − 0.45) / 0.91 ≈ 0.05549, quarter ≈ 0.01387
        let bet = calc().size_bet(&edge(0.55, 1.91, 0.25)).unwrap();
        assert_eq!(bet.stake_units, dec!(1.39));
        assert!(!bet.capped);
    }

    #[test]
    fn test_no_stake_without_edge() {
        assert!(calc().size_bet(&edge(0.5, 1.91, 0.25)).is_none());
    }

    #[test]
    fn test_inconsistent_edge_not_staked() {
        // Positive Kelly share but no expected value: never sized.
        let e = Edge {
            expected_value: -0.01,
            ..edge(0.6, 2.0, 0.25)
        };
        assert!(e.kelly_fraction > 0.0);
        assert!(calc().size_bet(&e).is_none());
    }

    #[test]
    fn test_below_minimum_dropped() {
        let calc = KellyCalculator::new(StakingConfig {
            min_stake_units: 2.0,
            ..StakingConfig::default()
        });
        assert!(calc.size_bet(&edge(0.55, 1.91, 0.25)).is_none());
    }

    #[test]
    fn test_smaller_multiplier_never_stakes_more() {
        let calc = KellyCalculator::new(StakingConfig {
            max_stake_units: 50.0,
            ..StakingConfig::default()
        });
        let quarter = calc.size_bet(&edge(0.6, 2.0, 0.25)).unwrap();
        let half = calc.size_bet(&edge(0.6, 2.0, 0.5)).unwrap();
        assert!(quarter.stake_units < half.stake_units);
    }
}
