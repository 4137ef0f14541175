//! Betting math: odds conversion, implied probability, EV, edge, Kelly.
//!
//! Prices are decimal odds throughout the crate. Probabilities must lie in
//! (0, 1) exclusive and prices must be finite and greater than 1; anything
//! else is a caller error and returns `SharplineError::InvalidInput`.

use crate::types::SharplineError;

type MathResult<T> = std::result::Result<T, SharplineError>;

fn check_price(price: f64) -> MathResult<()> {
    if price.is_finite() && price > 1.0 {
        Ok(())
    } else {
        Err(SharplineError::InvalidInput(format!(
            "decimal price must be > 1, got {price}"
        )))
    }
}

fn check_probability(p: f64) -> MathResult<()> {
    if p.is_finite() && p > 0.0 && p < 1.0 {
        Ok(())
    } else {
        Err(SharplineError::InvalidInput(format!(
            "probability must be in (0, 1), got {p}"
        )))
    }
}

/// Break-even win probability of a decimal price: `1 / price`.
pub fn implied_probability(price: f64) -> MathResult<f64> {
    check_price(price)?;
    Ok(1.0 / price)
}

/// Expected profit of staking `stake` at `price` with win probability `p`:
/// `p·(price − 1)·stake − (1 − p)·stake`.
pub fn expected_value(price: f64, p: f64, stake: f64) -> MathResult<f64> {
    check_price(price)?;
    check_probability(p)?;
    Ok(p * (price - 1.0) * stake - (1.0 - p) * stake)
}

/// Model probability minus implied probability.
pub fn edge(p: f64, implied: f64) -> MathResult<f64> {
    check_probability(p)?;
    check_probability(implied)?;
    Ok(p - implied)
}

/// Fractional Kelly stake as a share of bankroll.
///
/// Raw Kelly is `(b·p − q) / b` with `b = price − 1`, `q = 1 − p`; a raw
/// value ≤ 0 means no bet and yields 0. The result is never negative.
pub fn kelly_fraction(price: f64, p: f64, multiplier: f64) -> MathResult<f64> {
    check_price(price)?;
    check_probability(p)?;
    if !(multiplier.is_finite() && multiplier >= 0.0) {
        return Err(SharplineError::InvalidInput(format!(
            "kelly multiplier must be >= 0, got {multiplier}"
        )));
    }
    let b = price - 1.0;
    let raw = (b * p - (1.0 - p)) / b;
    if raw <= 0.0 {
        return Ok(0.0);
    }
    Ok(raw * multiplier)
}

// ---------------------------------------------------------------------------
// Odds formats
// ---------------------------------------------------------------------------

/// American odds (+150, −110) to decimal (2.5, 1.909…).
pub fn american_to_decimal(american: f64) -> MathResult<f64> {
    if !american.is_finite() || american.abs() < 100.0 {
        return Err(SharplineError::InvalidInput(format!(
            "american odds must be <= -100 or >= +100, got {american}"
        )));
    }
    if american > 0.0 {
        Ok(1.0 + american / 100.0)
    } else {
        Ok(1.0 + 100.0 / american.abs())
    }
}

/// Decimal odds to American. Prices of 2.0 and above are positive.
pub fn decimal_to_american(price: f64) -> MathResult<f64> {
    check_price(price)?;
    if price >= 2.0 {
        Ok((price - 1.0) * 100.0)
    } else {
        Ok(-100.0 / (price - 1.0))
    }
}

/// Largest denominator tried for a fractional display.
pub const MAX_FRACTION_DENOMINATOR: u32 = 1000;

/// Relative error above which a price has no fractional display.
const MAX_FRACTION_ERROR: f64 = 0.01;

/// Decimal odds to a reduced fractional display (2.5 → 3/2), using the
/// closest fraction with a denominator of at most
/// [`MAX_FRACTION_DENOMINATOR`].
///
/// Prices whose profit part is too small to approximate within 1%, or too
/// large for a `u32` numerator, are `InvalidInput`.
pub fn decimal_to_fractional(price: f64) -> MathResult<(u32, u32)> {
    check_price(price)?;
    let target = price - 1.0;
    let mut best: Option<(u32, u32, f64)> = None;
    for den in 1..=MAX_FRACTION_DENOMINATOR {
        let scaled = (target * den as f64).round();
        if scaled < 1.0 {
            continue;
        }
        // Numerators only grow with the denominator.
        let Ok(num) = u32::try_from(scaled as u64) else {
            break;
        };
        let err = (num as f64 / den as f64 - target).abs();
        if best.map_or(true, |(_, _, best_err)| err + 1e-12 < best_err) {
            best = Some((num, den, err));
        }
    }

    match best {
        Some((num, den, err)) if err / target <= MAX_FRACTION_ERROR => {
            let g = gcd(num, den);
            Ok((num / g, den / g))
        }
        _ => Err(SharplineError::InvalidInput(format!(
            "decimal price {price} has no fractional form"
        ))),
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a.max(1)
    } else {
        gcd(b, a % b)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_even_money_worked_example() {
        let implied = implied_probability(2.0).unwrap();
        assert!(close(implied, 0.5));
        assert!(close(edge(0.6, implied).unwrap(), 0.1));
        assert!(close(expected_value(2.0, 0.6, 100.0).unwrap(), 20.0));
    }

    #[test]
    fn test_kelly_fraction() {
        // b = 1, raw = (0.6 − 0.4) / 1 = 0.2, quarter Kelly = 0.05
        assert!(close(kelly_fraction(2.0, 0.6, 0.25).unwrap(), 0.05));
        assert!(close(kelly_fraction(2.0, 0.6, 1.0).unwrap(), 0.2));
    }

    #[test]
    fn test_kelly_never_negative() {
        assert_eq!(kelly_fraction(2.0, 0.4, 0.25).unwrap(), 0.0);
        assert_eq!(kelly_fraction(1.5, 0.5, 1.0).unwrap(), 0.0);
        for price in [1.01, 1.5, 1.91, 2.5, 10.0] {
            for p in [0.01, 0.2, 0.5, 0.8, 0.99] {
                assert!(kelly_fraction(price, p, 0.5).unwrap() >= 0.0);
            }
        }
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(implied_probability(1.0).is_err());
        assert!(implied_probability(0.5).is_err());
        assert!(implied_probability(f64::NAN).is_err());
        assert!(expected_value(2.0, 1.0, 10.0).is_err());
        assert!(expected_value(2.0, 0.0, 10.0).is_err());
        assert!(kelly_fraction(2.0, 1.2, 0.25).is_err());
        assert!(kelly_fraction(2.0, 0.6, -1.0).is_err());
        assert!(edge(0.5, 1.0).is_err());
        assert!(matches!(implied_probability(1.0), Err(SharplineError::InvalidInput(_))));
    }

    #[test]
    fn test_negative_ev() {
        assert!(expected_value(1.91, 0.5, 1.0).unwrap() < 0.0);
    }

    #[test]
    fn test_american_conversion() {
        assert!(close(american_to_decimal(150.0).unwrap(), 2.5));
        assert!(close(american_to_decimal(-200.0).unwrap(), 1.5));
        assert!(close(american_to_decimal(-110.0).unwrap(), 1.0 + 100.0 / 110.0));
        assert!(close(american_to_decimal(100.0).unwrap(), 2.0));
        assert!(american_to_decimal(50.0).is_err());

        assert!(close(decimal_to_american(2.5).unwrap(), 150.0));
        assert!(close(decimal_to_american(1.5).unwrap(), -200.0));
        assert!(close(decimal_to_american(2.0).unwrap(), 100.0));
    }

    #[test]
    fn test_fractional_display() {
        assert_eq!(decimal_to_fractional(2.5).unwrap(), (3, 2));
        assert_eq!(decimal_to_fractional(2.0).unwrap(), (1, 1));
        assert_eq!(decimal_to_fractional(1.5).unwrap(), (1, 2));
        assert_eq!(decimal_to_fractional(1.0 + 100.0 / 110.0).unwrap(), (10, 11));
        assert_eq!(decimal_to_fractional(11.0).unwrap(), (10, 1));
        assert!(decimal_to_fractional(1.0).is_err());
    }

    #[test]
    fn test_fractional_short_prices() {
        assert_eq!(decimal_to_fractional(1.004).unwrap(), (1, 250));
        assert_eq!(decimal_to_fractional(1.01).unwrap(), (1, 100));
        assert_eq!(decimal_to_fractional(1.002).unwrap(), (1, 500));
        // Below 1/1000 nothing is within 1%.
        assert!(decimal_to_fractional(1.0001).is_err());
        assert!(decimal_to_fractional(1.0007).is_err());
    }

    #[test]
    fn test_fractional_long_prices() {
        assert_eq!(decimal_to_fractional(5001.0).unwrap(), (5000, 1));
        assert_eq!(decimal_to_fractional(10_000_001.0).unwrap(), (10_000_000, 1));
        assert!(decimal_to_fractional(1e12).is_err());
        assert!(decimal_to_fractional(f64::MAX).is_err());
    }
}
