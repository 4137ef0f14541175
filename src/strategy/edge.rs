//! Edge measurement.
//!
//! Compares a model win probability against the consensus price of the same
//! selection and derives everything the gate and the sizer need from it.

use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

use super::odds;
use crate::types::{MarketKey, SharplineError};

/// Measured mispricing of one selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub key: MarketKey,
    /// Model win probability.
    pub probability: f64,
    /// Decimal price the edge was measured against.
    pub price: f64,
    pub implied_probability: f64,
    /// probability − implied probability.
    pub edge: f64,
    /// Expected profit per unit staked.
    pub expected_value: f64,
    /// Fractional Kelly share of bankroll (never negative).
    pub kelly_fraction: f64,
}

impl Edge {
    pub fn measure(
        key: &MarketKey,
        probability: f64,
        price: f64,
        kelly_multiplier: f64,
    ) -> Result<Self, SharplineError> {
        let implied = odds::implied_probability(price)?;
        let edge = Self {
            key: key.clone(),
            probability,
            price,
            implied_probability: implied,
            edge: odds::edge(probability, implied)?,
            expected_value: odds::expected_value(price, probability, 1.0)?,
            kelly_fraction: odds::kelly_fraction(price, probability, kelly_multiplier)?,
        };
        debug!(
            %key,
            edge = format!("{:.1}%", edge.edge * 100.0),
            ev = format!("{:.3}", edge.expected_value),
            kelly = format!("{:.2}%", edge.kelly_fraction * 100.0),
            "Edge measured"
        );
        Ok(edge)
    }

    pub fn is_positive(&self) -> bool {
        self.edge > 0.0 && self.expected_value > 0.0
    }

    /// Best-first ordering: higher expected value, then higher edge, then key.
    pub fn cmp_best_first(&self, other: &Edge) -> Ordering {
        other
            .expected_value
            .total_cmp(&self.expected_value)
            .then(other.edge.total_cmp(&self.edge))
            .then_with(|| self.key.cmp(&other.key))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
