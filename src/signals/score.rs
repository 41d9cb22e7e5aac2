//! Composite score.
//!
//! Six additive, individually saturating components sum to a 0-100 score.
//! Component weights come from the parameter snapshot so the learning cycle
//! and the operator can tune them without recompiling.

use crate::models::{Quote, ScoreBreakdown};
use crate::store::params::Params;

/// Velocity saturates at this many dollars of drift per ten-second window.
const VELOCITY_SATURATION_PER_10S: f64 = 0.03;

/// Noise floor subtracted from the spread differential.
const SPREAD_DIFF_NOISE_FLOOR: f64 = 0.02;
/// Spread differential saturates here (post-floor).
const SPREAD_DIFF_SATURATION: f64 = 0.10;

/// Seconds-since-last-trade on Gemini at which staleness saturates.
const STALENESS_SATURATION_SECS: f64 = 180.0;

/// Category win rate bootstraps at 50% until this many trades exist.
const CATEGORY_MIN_OBSERVATIONS: u32 = 20;

/// Consensus contribution scale when only one reference venue is present.
const SINGLE_SOURCE_FACTOR: f64 = 0.6;

/// Liquidity sub-thresholds: spread on Gemini and total top depth.
const LIQUID_SPREAD_MAX: f64 = 0.05;
const LIQUID_DEPTH_MIN: f64 = 200.0;

pub struct ScoreInputs<'a> {
    pub gemini: &'a Quote,
    pub prob_polymarket: Option<f64>,
    pub prob_kalshi: Option<f64>,
    /// Reference-venue mid history for this market, oldest first.
    pub ref_mid_history: &'a [f64],
    /// Wall-clock span covered by the history.
    pub history_span_secs: f64,
    pub polymarket_spread: Option<f64>,
    pub kalshi_spread: Option<f64>,
    pub secs_since_last_trade: i64,
    pub category_wins: u32,
    pub category_total: u32,
    /// Confidence of the surviving source when only one reference is present.
    pub single_source_confidence: f64,
}

pub fn composite(inputs: &ScoreInputs<'_>, params: &Params) -> ScoreBreakdown {
    ScoreBreakdown {
        velocity: velocity_points(inputs, params.get("w_velocity")),
        spread_differential: spread_diff_points(inputs, params.get("w_spread_diff")),
        consensus: consensus_points(inputs, params.get("w_consensus")),
        staleness: staleness_points(inputs, params.get("w_staleness")),
        category_win_rate: category_points(inputs, params.get("w_category")),
        liquidity: liquidity_points(inputs, params.get("w_liquidity")),
    }
}

/// Magnitude of smoothed reference-price drift, per ~10 s window.
fn velocity_points(inputs: &ScoreInputs<'_>, weight: f64) -> f64 {
    let h = inputs.ref_mid_history;
    if h.len() < 2 || inputs.history_span_secs <= 0.0 {
        return 0.0;
    }
    let drift = (h[h.len() - 1] - h[0]).abs();
    let per_window = drift / (inputs.history_span_secs / 10.0);
    weight * (per_window / VELOCITY_SATURATION_PER_10S).min(1.0)
}

/// |spread(A) - mean(spread(B), spread(C))| above the noise floor.
fn spread_diff_points(inputs: &ScoreInputs<'_>, weight: f64) -> f64 {
    let refs: Vec<f64> = [inputs.polymarket_spread, inputs.kalshi_spread]
        .into_iter()
        .flatten()
        .collect();
    if refs.is_empty() {
        return 0.0;
    }
    let mean_ref = refs.iter().sum::<f64>() / refs.len() as f64;
    let diff = (inputs.gemini.spread() - mean_ref).abs();
    let over_floor = (diff - SPREAD_DIFF_NOISE_FLOOR).max(0.0);
    weight * (over_floor / SPREAD_DIFF_SATURATION).min(1.0)
}

/// Cross-platform agreement; degrades to scaled single-source confidence.
fn consensus_points(inputs: &ScoreInputs<'_>, weight: f64) -> f64 {
    match (inputs.prob_polymarket, inputs.prob_kalshi) {
        (Some(pb), Some(pc)) => weight * (1.0 - (pb - pc).abs()).clamp(0.0, 1.0),
        (Some(_), None) | (None, Some(_)) => {
            weight * (inputs.single_source_confidence * SINGLE_SOURCE_FACTOR).clamp(0.0, 1.0)
        }
        (None, None) => 0.0,
    }
}

/// Monotone in seconds since Gemini last traded, capped.
fn staleness_points(inputs: &ScoreInputs<'_>, weight: f64) -> f64 {
    let secs = inputs.secs_since_last_trade.max(0) as f64;
    weight * (secs / STALENESS_SATURATION_SECS).min(1.0)
}

/// Moving category win rate, bootstrapped at 50% below the observation floor.
fn category_points(inputs: &ScoreInputs<'_>, weight: f64) -> f64 {
    let rate = if inputs.category_total < CATEGORY_MIN_OBSERVATIONS {
        0.5
    } else {
        inputs.category_wins as f64 / inputs.category_total as f64
    };
    weight * rate.clamp(0.0, 1.0)
}

/// Three equal sub-checks: two-sided book, tight spread, real depth.
fn liquidity_points(inputs: &ScoreInputs<'_>, weight: f64) -> f64 {
    let q = inputs.gemini;
    let sub = weight / 3.0;
    let mut points = 0.0;
    if q.two_sided() {
        points += sub;
    }
    if q.spread() < LIQUID_SPREAD_MAX {
        points += sub;
    }
    let depth = q.bid_depth.unwrap_or(0.0) + q.ask_depth.unwrap_or(0.0);
    if depth > LIQUID_DEPTH_MIN {
        points += sub;
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gemini_quote() -> Quote {
        Quote {
            bid: 0.53,
            ask: 0.57,
            last: 0.55,
            bid_depth: Some(200.0),
            ask_depth: Some(200.0),
            ts: 0,
        }
    }

    fn base_inputs<'a>(q: &'a Quote, history: &'a [f64]) -> ScoreInputs<'a> {
        ScoreInputs {
            gemini: q,
            prob_polymarket: Some(0.62),
            prob_kalshi: Some(0.63),
            ref_mid_history: history,
            history_span_secs: 60.0,
            polymarket_spread: Some(0.02),
            kalshi_spread: Some(0.02),
            secs_since_last_trade: 120,
            category_wins: 29,
            category_total: 50,
            single_source_confidence: 0.8,
        }
    }

    #[test]
    fn consensus_agreement_scenario() {
        // probB 0.62, probC 0.63, A last trade 120 s ago, 58% win rate over
        // 50 trades, two-sided 400-deep book.
        let q = gemini_quote();
        let history = [0.62, 0.621, 0.622, 0.6225, 0.623];
        let params = Params::defaults();
        let b = composite(&base_inputs(&q, &history), &params);

        assert!((b.consensus - 24.75).abs() < 0.01, "consensus {}", b.consensus);
        assert!((b.staleness - 10.0).abs() < 0.01, "staleness {}", b.staleness);
        assert!((b.category_win_rate - 11.6).abs() < 0.01);
        assert!((b.liquidity - 15.0).abs() < 0.01);
        // Slow drift keeps velocity small.
        assert!(b.velocity < 3.0, "velocity {}", b.velocity);

        let total = b.total();
        assert!(total > 55.0 && total < 75.0, "total {total}");
    }

    #[test]
    fn single_source_consensus_degrades() {
        let q = gemini_quote();
        let history = [0.62, 0.62];
        let mut inputs = base_inputs(&q, &history);
        inputs.prob_kalshi = None;
        let params = Params::defaults();
        let b = composite(&inputs, &params);
        // 0.8 confidence * 0.6 * 25 points.
        assert!((b.consensus - 12.0).abs() < 0.01, "consensus {}", b.consensus);
    }

    #[test]
    fn category_bootstraps_at_half_weight() {
        let q = gemini_quote();
        let history = [0.62, 0.62];
        let mut inputs = base_inputs(&q, &history);
        inputs.category_wins = 12;
        inputs.category_total = 19;
        let params = Params::defaults();
        let b = composite(&inputs, &params);
        assert!((b.category_win_rate - 10.0).abs() < 1e-9);
    }

    #[test]
    fn velocity_saturates() {
        let q = gemini_quote();
        // 6 cents of drift over 20 s: 3c per 10 s window, the saturation point.
        let history = [0.50, 0.56];
        let mut inputs = base_inputs(&q, &history);
        inputs.history_span_secs = 20.0;
        let params = Params::defaults();
        let b = composite(&inputs, &params);
        assert!((b.velocity - 15.0).abs() < 1e-9);
    }

    #[test]
    fn spread_differential_floors_noise() {
        let q = gemini_quote(); // spread 0.04
        let history = [0.62, 0.62];
        let mut inputs = base_inputs(&q, &history);
        // Mean ref spread 0.02, diff 0.02: all under the floor.
        inputs.polymarket_spread = Some(0.02);
        inputs.kalshi_spread = Some(0.02);
        let params = Params::defaults();
        let b = composite(&inputs, &params);
        assert!(b.spread_differential.abs() < 1e-9);
    }

    #[test]
    fn illiquid_one_sided_book_scores_low() {
        let q = Quote {
            bid: 0.0,
            ask: 0.57,
            last: 0.55,
            bid_depth: None,
            ask_depth: Some(50.0),
            ts: 0,
        };
        let history = [0.62, 0.62];
        let inputs = base_inputs(&q, &history);
        let params = Params::defaults();
        let b = composite(&inputs, &params);
        assert!(b.liquidity < 5.1, "liquidity {}", b.liquidity);
    }
}
