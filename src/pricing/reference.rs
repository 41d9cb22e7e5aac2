//! Reference price builder.
//!
//! Merges the fresh source probabilities for one matched market into a single
//! weighted reference probability. Category-specific weights; absent sources
//! redistribute their weight proportionally onto the present ones; a single
//! source disagreeing hard with the rest is down-weighted so one stale feed
//! cannot dominate.

use crate::models::{Category, PriceSource, ReferencePrice, SourceProb};

/// Spread above this excludes a bracket from the synthetic sum.
const BRACKET_MAX_SPREAD: f64 = 0.50;

/// Max-minus-min source spread that triggers outlier down-weighting.
const DISAGREEMENT_THRESHOLD: f64 = 0.40;

/// Outlier weight multiplier once flagged.
const OUTLIER_WEIGHT_FACTOR: f64 = 0.10;

/// One Kalshi bracket's quote state, as consumed by the synthetic sum.
#[derive(Debug, Clone, Copy)]
pub struct BracketQuote {
    pub mid: f64,
    pub spread: f64,
    pub volume: f64,
}

/// Synthetic probability for a bracket-set bound to a contract: the sum of
/// liquid bracket mids, clamped into [0, 1]. None when no bracket is usable.
pub fn synthetic_probability(brackets: &[BracketQuote]) -> Option<f64> {
    let mut sum = 0.0;
    let mut used = 0usize;
    for b in brackets {
        if b.spread > BRACKET_MAX_SPREAD || b.volume <= 0.0 {
            continue;
        }
        if !(0.0..=1.0).contains(&b.mid) {
            continue;
        }
        sum += b.mid;
        used += 1;
    }
    if used == 0 {
        return None;
    }
    Some(sum.clamp(0.0, 1.0))
}

/// Number of brackets that survive the liquidity filter.
pub fn liquid_bracket_count(brackets: &[BracketQuote]) -> usize {
    brackets
        .iter()
        .filter(|b| b.spread <= BRACKET_MAX_SPREAD && b.volume > 0.0 && (0.0..=1.0).contains(&b.mid))
        .count()
}

/// Nominal category weight for a source kind. Oracle weight is shared equally
/// among the oracles present in the cycle.
fn nominal_weight(category: Category, source: &PriceSource, params: &crate::store::params::Params) -> f64 {
    match category {
        Category::Crypto => match source {
            PriceSource::KalshiSynthetic => params.get("ens_crypto_kalshi"),
            PriceSource::BlackScholes => params.get("ens_crypto_bs"),
            _ => 0.0,
        },
        Category::Politics | Category::Elections => match source {
            PriceSource::Polymarket => params.get("ens_politics_pm"),
            PriceSource::KalshiSynthetic => params.get("ens_politics_kalshi"),
            PriceSource::Oracle(_) => params.get("ens_politics_oracle"),
            _ => 0.0,
        },
        Category::Sports => match source {
            PriceSource::Oracle(_) => params.get("ens_sports_oracle"),
            PriceSource::Polymarket => params.get("ens_sports_pm"),
            PriceSource::KalshiSynthetic => params.get("ens_sports_kalshi"),
            _ => 0.0,
        },
        _ => match source {
            PriceSource::Polymarket => params.get("ens_default_pm"),
            PriceSource::KalshiSynthetic => params.get("ens_default_kalshi"),
            _ => 0.0,
        },
    }
}

/// Build the weighted reference probability from the sources present this
/// cycle. Sources with out-of-range probabilities are excluded up front.
pub fn build_reference(
    category: Category,
    available: &[(PriceSource, f64)],
    params: &crate::store::params::Params,
) -> Option<ReferencePrice> {
    let oracle_count = available
        .iter()
        .filter(|(s, _)| matches!(s, PriceSource::Oracle(_)))
        .count()
        .max(1) as f64;

    let mut sources: Vec<SourceProb> = available
        .iter()
        .filter(|(_, p)| (0.0..=1.0).contains(p))
        .map(|(s, p)| {
            let mut w = nominal_weight(category, s, params);
            if matches!(s, PriceSource::Oracle(_)) {
                w /= oracle_count;
            }
            SourceProb {
                source: s.clone(),
                prob: *p,
                weight: w,
            }
        })
        .filter(|sp| sp.weight > 0.0)
        .collect();

    if sources.is_empty() {
        return None;
    }

    // Proportional redistribution of absent weight.
    normalize(&mut sources);

    // Model disagreement: down-weight the source furthest from the median.
    let mut disagreement = false;
    if sources.len() >= 2 {
        let max = sources.iter().map(|s| s.prob).fold(f64::MIN, f64::max);
        let min = sources.iter().map(|s| s.prob).fold(f64::MAX, f64::min);
        if max - min > DISAGREEMENT_THRESHOLD {
            disagreement = true;
            let median = median_prob(&sources);
            if let Some(outlier_idx) = sources
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    (a.prob - median).abs().total_cmp(&(b.prob - median).abs())
                })
                .map(|(i, _)| i)
            {
                sources[outlier_idx].weight *= OUTLIER_WEIGHT_FACTOR;
                normalize(&mut sources);
            }
        }
    }

    let prob = sources
        .iter()
        .map(|s| s.prob * s.weight)
        .sum::<f64>()
        .clamp(0.0, 1.0);

    Some(ReferencePrice {
        prob,
        sources,
        disagreement,
    })
}

fn normalize(sources: &mut [SourceProb]) {
    let total: f64 = sources.iter().map(|s| s.weight).sum();
    if total > 0.0 {
        for s in sources.iter_mut() {
            s.weight /= total;
        }
    }
}

fn median_prob(sources: &[SourceProb]) -> f64 {
    let mut probs: Vec<f64> = sources.iter().map(|s| s.prob).collect();
    probs.sort_by(|a, b| a.total_cmp(b));
    let n = probs.len();
    if n % 2 == 1 {
        probs[n / 2]
    } else {
        (probs[n / 2 - 1] + probs[n / 2]) / 2.0
    }
}
