//! Fair-value engine for crypto binaries.
//!
//! Mixes the Black-Scholes model probability with the Kalshi synthetic (and
//! any aux oracles via the reference weights), applies the spot-reality gate,
//! and produces `{fair_value, edge, kelly_fraction, confidence}` against the
//! live Gemini quote.

use tracing::debug;

use crate::config::VolSource;
use crate::models::{Category, Direction, FairValue, Payoff, PriceSource, Quote, StructuralMeta};
use crate::pricing::binary::{implied_vol_from_synthetic, prob_payoff};
use crate::pricing::reference::build_reference;
use crate::store::params::Params;

const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;

/// Moneyness beyond which the spot-reality gate engages.
const DEEP_ITM_MONEYNESS: f64 = 1.30;
/// Models asserting less than this P(above) while deeply ITM are zeroed.
const DEEP_ITM_MIN_PROB: f64 = 0.45;

/// Implied vol needs at least this many liquid brackets to trust the lattice.
const IMPLIED_MIN_BRACKETS: usize = 3;

/// Time-to-expiry band where confidence is full.
const TTE_WELL_BEHAVED_MIN_SECS: f64 = 3600.0;
const TTE_WELL_BEHAVED_MAX_SECS: f64 = 7.0 * 86_400.0;

/// Depth on Gemini at which the liquidity term saturates.
const FULL_LIQUIDITY_DEPTH: f64 = 500.0;

pub struct FairValueInputs<'a> {
    pub meta: &'a StructuralMeta,
    pub spot: f64,
    pub now: i64,
    /// Synthetic P(payoff) from the bound bracket set, if computable.
    pub synthetic: Option<f64>,
    pub liquid_brackets: usize,
    pub gemini: &'a Quote,
    pub vol_source: VolSource,
}

/// Evaluate one crypto market. None when the contract is expired or the
/// Gemini quote is unusable.
pub fn evaluate(inputs: &FairValueInputs<'_>, params: &Params) -> Option<FairValue> {
    evaluate_full(inputs, params).map(|(fv, _)| fv)
}

/// As [`evaluate`], but also returns the ensemble reference it mixed, so the
/// fast loop can reuse it as the market's reference price.
pub fn evaluate_full(
    inputs: &FairValueInputs<'_>,
    params: &Params,
) -> Option<(FairValue, crate::models::ReferencePrice)> {
    let t_secs = (inputs.meta.expiry_ts - inputs.now) as f64;
    if t_secs <= 0.0 {
        return None;
    }
    let t_years = t_secs / SECONDS_PER_YEAR;

    if !inputs.gemini.two_sided() {
        return None;
    }
    let mid = inputs.gemini.mid();
    let half_spread = inputs.gemini.spread() / 2.0;

    let sigma = resolve_sigma(inputs, params, t_years);
    let p_bs = prob_payoff(
        inputs.meta.payoff,
        inputs.spot,
        inputs.meta.strike,
        t_years,
        sigma,
    );

    let mut sources: Vec<(PriceSource, f64)> = vec![(PriceSource::BlackScholes, p_bs)];
    if let Some(p_syn) = inputs.synthetic {
        sources.push((PriceSource::KalshiSynthetic, p_syn));
    }
    apply_spot_reality_gate(inputs, &mut sources);
    if sources.is_empty() {
        return None;
    }

    let reference = build_reference(Category::Crypto, &sources, params)?;
    let fair = reference.prob;

    let (direction, edge, side_price) = if fair >= mid {
        (Direction::Yes, fair - mid - half_spread, mid)
    } else {
        (Direction::No, mid - fair - half_spread, 1.0 - mid)
    };

    let kelly_fraction = if side_price < 1.0 && edge > 0.0 {
        (edge / (1.0 - side_price)).clamp(0.0, params.kelly_ceiling())
    } else {
        0.0
    };

    let confidence = confidence(inputs, p_bs, t_secs);

    Some((
        FairValue {
            fair_value: fair,
            direction,
            edge,
            kelly_fraction,
            confidence,
        },
        reference,
    ))
}

fn resolve_sigma(inputs: &FairValueInputs<'_>, params: &Params, t_years: f64) -> f64 {
    let fixed = params.volatility();
    if inputs.vol_source == VolSource::Fixed {
        return fixed;
    }
    // Implied vol must not dominate when the lattice is illiquid.
    if inputs.liquid_brackets < IMPLIED_MIN_BRACKETS {
        return fixed;
    }
    let Some(synthetic) = inputs.synthetic else {
        return fixed;
    };
    let synthetic_above = match inputs.meta.payoff {
        Payoff::Above => synthetic,
        Payoff::Below => 1.0 - synthetic,
    };
    match implied_vol_from_synthetic(inputs.spot, inputs.meta.strike, t_years, synthetic_above) {
        Some(vol) => vol,
        None => {
            debug!(strike = inputs.meta.strike, "implied vol unavailable, using fixed");
            fixed
        }
    }
}

/// Deeply in-the-money contracts must not be priced down by a stale source:
/// any model claiming P(above) below the floor is zeroed for the cycle.
fn apply_spot_reality_gate(
    inputs: &FairValueInputs<'_>,
    sources: &mut Vec<(PriceSource, f64)>,
) {
    let moneyness = inputs.spot / inputs.meta.strike;
    if moneyness <= DEEP_ITM_MONEYNESS {
        return;
    }
    sources.retain(|(source, p)| {
        let p_above = match inputs.meta.payoff {
            Payoff::Above => *p,
            Payoff::Below => 1.0 - *p,
        };
        let keep = p_above > DEEP_ITM_MIN_PROB;
        if !keep {
            debug!(source = %source.label(), p_above, "spot-reality gate zeroed model");
        }
        keep
    });
}

/// Monotone blend of source agreement, Gemini liquidity, and the
/// time-to-expiry band.
fn confidence(inputs: &FairValueInputs<'_>, p_bs: f64, t_secs: f64) -> f64 {
    let agreement = match inputs.synthetic {
        Some(p_syn) => 1.0 - (p_bs - p_syn).abs(),
        None => 0.6,
    };

    let depth = inputs.gemini.bid_depth.unwrap_or(0.0) + inputs.gemini.ask_depth.unwrap_or(0.0);
    let liquidity = (depth / FULL_LIQUIDITY_DEPTH).clamp(0.0, 1.0);

    let tte = if t_secs < TTE_WELL_BEHAVED_MIN_SECS {
        t_secs / TTE_WELL_BEHAVED_MIN_SECS
    } else if t_secs > TTE_WELL_BEHAVED_MAX_SECS {
        TTE_WELL_BEHAVED_MAX_SECS / t_secs
    } else {
        1.0
    };

    (0.4 * agreement + 0.3 * liquidity + 0.3 * tte).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(strike: f64, expiry_ts: i64, payoff: Payoff) -> StructuralMeta {
        StructuralMeta {
            asset: "BTC".to_string(),
            strike,
            expiry_ts,
            payoff,
            brackets: vec![],
        }
    }

    fn quote(bid: f64, ask: f64) -> Quote {
        Quote {
            bid,
            ask,
            last: (bid + ask) / 2.0,
            bid_depth: Some(400.0),
            ask_depth: Some(400.0),
            ts: 0,
        }
    }

    #[test]
    fn fair_value_yes_entry_scenario() {
        // Spot 67,800 / strike 67,500, 4 h out, 45% vol, Gemini 0.57/0.61.
        let now = 1_000_000;
        let m = meta(67_500.0, now + 4 * 3600, Payoff::Above);
        let q = quote(0.57, 0.61);
        let mut map: std::collections::HashMap<String, f64> = crate::store::params::PARAM_DEFAULTS
            .iter()
            .map(|(k, v, _, _)| (k.to_string(), *v))
            .collect();
        map.insert("volatility".to_string(), 0.45);
        let params = Params::from_map(map);

        let fv = evaluate(
            &FairValueInputs {
                meta: &m,
                spot: 67_800.0,
                now,
                synthetic: None,
                liquid_brackets: 0,
                gemini: &q,
                vol_source: VolSource::Fixed,
            },
            &params,
        )
        .unwrap();

        assert_eq!(fv.direction, Direction::Yes);
        assert!((fv.fair_value - 0.678).abs() < 0.01, "fair {}", fv.fair_value);
        // edge = fair - 0.59 - 0.02.
        assert!((fv.edge - 0.068).abs() < 0.012, "edge {}", fv.edge);
        // f* = edge / (1 - mid) stays under the 0.25 ceiling.
        assert!(fv.kelly_fraction > 0.10 && fv.kelly_fraction <= 0.25);
        assert!(fv.confidence > 0.0 && fv.confidence <= 1.0);
    }

    #[test]
    fn deep_itm_gate_zeroes_stale_synthetic() {
        let now = 1_000_000;
        // Moneyness 80k/60k = 1.33: deeply ITM.
        let m = meta(60_000.0, now + 4 * 3600, Payoff::Above);
        let q = quote(0.90, 0.94);
        let params = Params::defaults();

        let fv = evaluate(
            &FairValueInputs {
                meta: &m,
                spot: 80_000.0,
                now,
                // A stale lattice claiming 30% above: gated out.
                synthetic: Some(0.30),
                liquid_brackets: 4,
                gemini: &q,
                vol_source: VolSource::Fixed,
            },
            &params,
        )
        .unwrap();

        // Only BS survives; fair value reflects the near-certain payout.
        assert!(fv.fair_value > 0.95, "fair {}", fv.fair_value);
    }

    #[test]
    fn expired_contract_yields_none() {
        let now = 1_000_000;
        let m = meta(67_500.0, now - 1, Payoff::Above);
        let q = quote(0.57, 0.61);
        let params = Params::defaults();
        assert!(evaluate(
            &FairValueInputs {
                meta: &m,
                spot: 67_800.0,
                now,
                synthetic: None,
                liquid_brackets: 0,
                gemini: &q,
                vol_source: VolSource::Fixed,
            },
            &params,
        )
        .is_none());
    }

    #[test]
    fn overpriced_market_goes_no() {
        let now = 1_000_000;
        let m = meta(70_000.0, now + 4 * 3600, Payoff::Above);
        // Market says 0.70 for a contract BS prices far lower.
        let q = quote(0.68, 0.72);
        let params = Params::defaults();
        let fv = evaluate(
            &FairValueInputs {
                meta: &m,
                spot: 66_000.0,
                now,
                synthetic: None,
                liquid_brackets: 0,
                gemini: &q,
                vol_source: VolSource::Fixed,
            },
            &params,
        )
        .unwrap();
        assert_eq!(fv.direction, Direction::No);
        assert!(fv.edge > 0.0);
    }
}
