//! Signal detector.
//!
//! Per fast-loop cycle: compute the composite score per matched market,
//! decide direction from the reference-vs-Gemini spread (never from the
//! absolute price level), filter to the actionable set, and merge in
//! fair-value and normalized synthetic-arb signals. Signals are transient
//! and expire with the cycle.
//!
//! Detection is a pure function of the cycle snapshot and the parameter
//! snapshot: replaying the same inputs yields a byte-identical signal list.

use crate::models::{
    Category, Direction, FairValue, MatchedMarket, Quote, QuoteSnapshot, ReferencePrice, Signal,
    StrategyTag,
};
use crate::signals::score::{composite, ScoreInputs};
use crate::store::params::Params;

/// Everything the detector needs about one market in one cycle.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub market: MatchedMarket,
    pub gemini: Option<Quote>,
    pub polymarket: Option<Quote>,
    pub kalshi_synthetic: Option<f64>,
    pub kalshi_spread: Option<f64>,
    pub reference: Option<ReferencePrice>,
    pub fair: Option<FairValue>,
    pub spot: Option<f64>,
    /// Reference-venue mid history, oldest first.
    pub ref_mid_history: Vec<f64>,
    pub history_span_secs: f64,
    pub secs_since_last_trade: i64,
    pub category_wins: u32,
    pub category_total: u32,
}

/// A cross-platform arb candidate in venue-agnostic buy/sell terms, before
/// normalization to YES/NO.
#[derive(Debug, Clone)]
pub struct SyntheticArbCandidate {
    pub matched_id: String,
    pub gemini_symbol: String,
    pub category: Category,
    /// True when the plan buys the Gemini leg (it is the cheap side).
    pub buy_gemini: bool,
    pub net_edge: f64,
    pub confidence: f64,
}

/// Detect the full per-cycle signal list: composite per market, fair-value
/// merge, then allow-listed synthetic arbs. Sorted by score descending,
/// symbol ascending, for stable output.
pub fn detect_all(
    snapshots: &[MarketSnapshot],
    arb_candidates: &[SyntheticArbCandidate],
    params: &Params,
    live: bool,
    synth_arb_allowed: &[Category],
) -> Vec<Signal> {
    let mut signals: Vec<Signal> = Vec::with_capacity(snapshots.len());

    for snap in snapshots {
        let composite_signal = detect_composite(snap, params);
        let fair_signal = detect_fair_value(snap, params);

        // A fair-value signal with strictly larger edge replaces the
        // composite one for the same market.
        let chosen = match (composite_signal, fair_signal) {
            (Some(c), Some(f)) => {
                if f.net_edge > c.net_edge {
                    Some(f)
                } else {
                    Some(c)
                }
            }
            (c, f) => c.or(f),
        };
        if let Some(s) = chosen {
            signals.push(s);
        }
    }

    for candidate in arb_candidates {
        if !synth_arb_allowed.contains(&candidate.category) {
            continue;
        }
        if signals.iter().any(|s| s.matched_id == candidate.matched_id) {
            continue;
        }
        signals.push(normalize_arb(candidate));
    }

    signals.retain(|s| actionable(s, params, live));
    signals.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.gemini_symbol.cmp(&b.gemini_symbol))
    });
    signals
}

/// Composite-strategy signal. Direction comes solely from the sign of
/// `reference - mid(A)` against the threshold; a missing reference means no
/// signal, never a level-based fallback.
pub fn detect_composite(snap: &MarketSnapshot, params: &Params) -> Option<Signal> {
    let gemini = snap.gemini.as_ref()?;
    let reference = snap.reference.as_ref()?;
    if !gemini.two_sided() {
        return None;
    }

    let mid = gemini.mid();
    let threshold = params.direction_threshold();
    let gap = reference.prob - mid;
    let direction = if gap > threshold {
        Direction::Yes
    } else if -gap > threshold {
        Direction::No
    } else {
        return None;
    };

    let net_edge = gap.abs() - gemini.spread() / 2.0 - 2.0 * params.fee_per_side();

    let breakdown = composite(
        &ScoreInputs {
            gemini,
            prob_polymarket: snap.polymarket.as_ref().map(|q| q.mid()),
            prob_kalshi: snap.kalshi_synthetic,
            ref_mid_history: &snap.ref_mid_history,
            history_span_secs: snap.history_span_secs,
            polymarket_spread: snap.polymarket.as_ref().map(|q| q.spread()),
            kalshi_spread: snap.kalshi_spread,
            secs_since_last_trade: snap.secs_since_last_trade,
            category_wins: snap.category_wins,
            category_total: snap.category_total,
            single_source_confidence: reference.sources.first().map(|s| s.weight).unwrap_or(0.5),
        },
        params,
    );
    let score = breakdown.total();

    let confidence = source_agreement_confidence(reference);

    Some(Signal {
        matched_id: snap.market.id.clone(),
        gemini_symbol: snap.market.gemini_symbol.clone(),
        category: snap.market.category,
        direction,
        score,
        net_edge,
        confidence,
        kelly: None,
        strategy: StrategyTag::Composite,
        quotes: quote_snapshot(snap),
        breakdown: Some(breakdown),
    })
}

/// Fair-value strategy signal straight from the engine output.
fn detect_fair_value(snap: &MarketSnapshot, params: &Params) -> Option<Signal> {
    let fair = snap.fair.as_ref()?;
    let gemini = snap.gemini.as_ref()?;
    if !gemini.two_sided() || fair.edge <= 0.0 {
        return None;
    }

    let net_edge = fair.edge - 2.0 * params.fee_per_side();
    Some(Signal {
        matched_id: snap.market.id.clone(),
        gemini_symbol: snap.market.gemini_symbol.clone(),
        category: snap.market.category,
        direction: fair.direction,
        score: (fair.confidence * 100.0).clamp(0.0, 100.0),
        net_edge,
        confidence: fair.confidence,
        kelly: Some(fair.kelly_fraction),
        strategy: StrategyTag::FairValue,
        quotes: quote_snapshot(snap),
        breakdown: None,
    })
}

/// Normalize a venue-agnostic arb plan to a YES/NO signal on the Gemini leg:
/// buying the cheap Gemini side is a YES, selling the rich side is a NO.
fn normalize_arb(candidate: &SyntheticArbCandidate) -> Signal {
    Signal {
        matched_id: candidate.matched_id.clone(),
        gemini_symbol: candidate.gemini_symbol.clone(),
        category: candidate.category,
        direction: if candidate.buy_gemini {
            Direction::Yes
        } else {
            Direction::No
        },
        score: (candidate.confidence * 100.0).clamp(0.0, 100.0),
        net_edge: candidate.net_edge,
        confidence: candidate.confidence,
        kelly: None,
        strategy: StrategyTag::SyntheticArb,
        quotes: QuoteSnapshot::default(),
        breakdown: None,
    }
}

/// Score and edge thresholds, live vs paper.
fn actionable(signal: &Signal, params: &Params, live: bool) -> bool {
    signal.score >= params.score_threshold() && signal.net_edge >= params.min_edge(live)
}

fn source_agreement_confidence(reference: &ReferencePrice) -> f64 {
    if reference.sources.len() < 2 {
        return 0.6;
    }
    let max = reference.sources.iter().map(|s| s.prob).fold(f64::MIN, f64::max);
    let min = reference.sources.iter().map(|s| s.prob).fold(f64::MAX, f64::min);
    let base = (1.0 - (max - min)).clamp(0.0, 1.0);
    if reference.disagreement {
        base * 0.5
    } else {
        base
    }
}

fn quote_snapshot(snap: &MarketSnapshot) -> QuoteSnapshot {
    QuoteSnapshot {
        gemini: snap.gemini,
        polymarket: snap.polymarket,
        kalshi_synthetic: snap.kalshi_synthetic,
        reference: snap.reference.as_ref().map(|r| r.prob),
        spot: snap.spot,
    }
}
