//! Black-Scholes binary-option pricer.
//!
//! `P(S_T > K) = Phi(d2)` with `d2 = [ln(S/K) + (r - sigma^2/2) T] / (sigma sqrt(T))`,
//! `r = 0` for crypto. Below-strike contracts price as the complement.

use statrs::distribution::{ContinuousCDF, Normal};
use std::sync::OnceLock;

use crate::models::Payoff;

/// Implied-vol search bounds (annualized).
const VOL_MIN: f64 = 0.05;
const VOL_MAX: f64 = 3.0;

/// Synthetic probabilities outside this band carry no vol information.
const IMPLIED_PROB_MIN: f64 = 0.02;
const IMPLIED_PROB_MAX: f64 = 0.98;

fn std_normal() -> &'static Normal {
    static NORMAL: OnceLock<Normal> = OnceLock::new();
    NORMAL.get_or_init(|| Normal::new(0.0, 1.0).expect("unit normal"))
}

pub fn phi(x: f64) -> f64 {
    std_normal().cdf(x)
}

/// Probability the spot finishes above the strike.
///
/// Expired or zero-vol inputs collapse to the indicator; degenerate inputs
/// return 0.5 rather than propagating NaN.
pub fn prob_above(spot: f64, strike: f64, t_years: f64, vol: f64, rate: f64) -> f64 {
    if !(spot.is_finite() && strike.is_finite()) || spot <= 0.0 || strike <= 0.0 {
        return 0.5;
    }
    if t_years <= 0.0 || vol <= 0.0 {
        return if spot >= strike { 1.0 } else { 0.0 };
    }

    let sqrt_t = t_years.sqrt();
    let d2 = ((spot / strike).ln() + (rate - 0.5 * vol * vol) * t_years) / (vol * sqrt_t);
    phi(d2)
}

/// Probability the contract pays out, for either payoff direction.
pub fn prob_payoff(payoff: Payoff, spot: f64, strike: f64, t_years: f64, vol: f64) -> f64 {
    let above = prob_above(spot, strike, t_years, vol, 0.0);
    match payoff {
        Payoff::Above => above,
        Payoff::Below => 1.0 - above,
    }
}

/// Annualized volatility implied by a synthetic above-strike probability from
/// the bracket lattice.
///
/// The map sigma -> P(above) is not monotone out of the money, so this runs a
/// coarse grid search and refines around the best cell. Returns None when the
/// synthetic carries no information (too close to 0 or 1) or the fit is poor.
pub fn implied_vol_from_synthetic(
    spot: f64,
    strike: f64,
    t_years: f64,
    synthetic_above: f64,
) -> Option<f64> {
    if t_years <= 0.0 || spot <= 0.0 || strike <= 0.0 {
        return None;
    }
    if !(IMPLIED_PROB_MIN..=IMPLIED_PROB_MAX).contains(&synthetic_above) {
        return None;
    }

    let objective = |vol: f64| (prob_above(spot, strike, t_years, vol, 0.0) - synthetic_above).abs();

    let coarse_steps = 60;
    let mut best_vol = VOL_MIN;
    let mut best_err = f64::INFINITY;
    for i in 0..=coarse_steps {
        let vol = VOL_MIN + (VOL_MAX - VOL_MIN) * i as f64 / coarse_steps as f64;
        let err = objective(vol);
        if err < best_err {
            best_err = err;
            best_vol = vol;
        }
    }

    // Local refinement around the best coarse cell.
    let cell = (VOL_MAX - VOL_MIN) / coarse_steps as f64;
    let lo = (best_vol - cell).max(VOL_MIN);
    let hi = (best_vol + cell).min(VOL_MAX);
    for i in 0..=100 {
        let vol = lo + (hi - lo) * i as f64 / 100.0;
        let err = objective(vol);
        if err < best_err {
            best_err = err;
            best_vol = vol;
        }
    }

    if best_err > 0.02 {
        return None;
    }
    Some(best_vol)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOURS_PER_YEAR: f64 = 24.0 * 365.25;

    #[test]
    fn at_the_money_is_half() {
        // As T -> 0+ the drift term vanishes and ATM converges to 0.5.
        let p = prob_above(67_500.0, 67_500.0, 1e-10, 0.5, 0.0);
        assert!((p - 0.5).abs() < 1e-6, "p = {p}");
    }

    #[test]
    fn expiry_limits_are_indicators() {
        assert_eq!(prob_above(70_000.0, 67_500.0, 0.0, 0.5, 0.0), 1.0);
        assert_eq!(prob_above(60_000.0, 67_500.0, 0.0, 0.5, 0.0), 0.0);
        // T -> 0+ with S > K approaches 1; S < K approaches 0.
        assert!(prob_above(70_000.0, 67_500.0, 1e-12, 0.5, 0.0) > 0.999999);
        assert!(prob_above(60_000.0, 67_500.0, 1e-12, 0.5, 0.0) < 1e-6);
    }

    #[test]
    fn four_hour_in_the_money_scenario() {
        // Spot 67,800 over strike 67,500, 4 h to expiry, 45% vol.
        let t = 4.0 / HOURS_PER_YEAR;
        let p = prob_above(67_800.0, 67_500.0, t, 0.45, 0.0);
        assert!((p - 0.678).abs() < 0.01, "p = {p}");
    }

    #[test]
    fn below_payoff_is_complement() {
        let t = 4.0 / HOURS_PER_YEAR;
        let above = prob_payoff(Payoff::Above, 67_800.0, 67_500.0, t, 0.45);
        let below = prob_payoff(Payoff::Below, 67_800.0, 67_500.0, t, 0.45);
        assert!((above + below - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_inputs_return_half() {
        assert_eq!(prob_above(0.0, 67_500.0, 0.1, 0.5, 0.0), 0.5);
        assert_eq!(prob_above(f64::NAN, 67_500.0, 0.1, 0.5, 0.0), 0.5);
    }

    #[test]
    fn implied_vol_recovers_known_sigma() {
        let t = 24.0 / HOURS_PER_YEAR;
        let synthetic = prob_above(67_800.0, 70_000.0, t, 0.65, 0.0);
        let implied = implied_vol_from_synthetic(67_800.0, 70_000.0, t, synthetic).unwrap();
        assert!((implied - 0.65).abs() < 0.05, "implied = {implied}");
    }

    #[test]
    fn implied_vol_rejects_uninformative_lattice() {
        let t = 4.0 / HOURS_PER_YEAR;
        assert!(implied_vol_from_synthetic(67_800.0, 67_500.0, t, 0.999).is_none());
        assert!(implied_vol_from_synthetic(67_800.0, 67_500.0, t, 0.001).is_none());
        assert!(implied_vol_from_synthetic(67_800.0, 67_500.0, 0.0, 0.5).is_none());
    }
}
