//! Market matcher.
//!
//! Every match cycle rebuilds the set of (Gemini, Polymarket?, Kalshi?)
//! triples that represent the same prediction: structural matching for crypto
//! binaries, title-fuzzy matching for everything else. The outcome is a delta
//! against the persisted set; rows unseen for more than one full cycle are
//! garbage collected by the scheduler.

pub mod fuzzy;
pub mod structural;

use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{Category, MatchedMarket, StructuralMeta};
use crate::venues::MarketDescriptor;
use structural::{
    asset_from_kalshi_event, bind_brackets, expiry_confidence, parse_gemini_symbol,
    parse_kalshi_event_expiry,
};

/// Operator-injected match. Always wins over computed matches, confidence 1.0.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManualOverride {
    pub gemini_symbol: String,
    pub polymarket_id: Option<String>,
    pub kalshi_id: Option<String>,
    pub title: String,
    pub category: Category,
}

pub struct MatchInputs<'a> {
    pub gemini: &'a [MarketDescriptor],
    pub polymarket: &'a [MarketDescriptor],
    pub kalshi: &'a [MarketDescriptor],
    pub existing: &'a [MatchedMarket],
    pub overrides: &'a [ManualOverride],
    pub now: i64,
}

#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub markets: Vec<MatchedMarket>,
    pub added: usize,
    pub refreshed: usize,
    /// Previously matched symbols absent this cycle (left for GC).
    pub vanished: usize,
}

/// One full match pass. Pure with respect to its inputs.
pub fn run_cycle(inputs: MatchInputs<'_>) -> MatchOutcome {
    let existing_by_symbol: HashMap<&str, &MatchedMarket> = inputs
        .existing
        .iter()
        .map(|m| (m.gemini_symbol.as_str(), m))
        .collect();

    let override_by_symbol: HashMap<&str, &ManualOverride> = inputs
        .overrides
        .iter()
        .map(|o| (o.gemini_symbol.as_str(), o))
        .collect();

    // Kalshi bracket markets grouped by their event ticker.
    let mut kalshi_by_event: HashMap<&str, Vec<&MarketDescriptor>> = HashMap::new();
    for m in inputs.kalshi {
        if let Some(event) = m.event_id.as_deref() {
            kalshi_by_event.entry(event).or_default().push(m);
        }
    }

    let mut matched: Vec<MatchedMarket> = Vec::new();

    for g in inputs.gemini {
        if let Some(ov) = override_by_symbol.get(g.id.as_str()) {
            matched.push(build_market(
                g,
                ov.polymarket_id.clone(),
                ov.kalshi_id.clone(),
                1.0,
                parse_structural(g, ov.kalshi_id.as_deref(), &kalshi_by_event),
                &existing_by_symbol,
                inputs.now,
            ));
            continue;
        }

        if g.category == Category::Crypto {
            if let Some(m) = structural_match(g, &kalshi_by_event, &existing_by_symbol, inputs.now)
            {
                matched.push(m);
            }
            continue;
        }

        let poly = fuzzy::best_match(g, inputs.polymarket);
        let kalshi = fuzzy::best_match(g, inputs.kalshi);
        if poly.is_none() && kalshi.is_none() {
            continue;
        }
        let confidence = poly
            .map(|(_, s)| s)
            .into_iter()
            .chain(kalshi.map(|(_, s)| s))
            .fold(0.0f64, f64::max);
        matched.push(build_market(
            g,
            poly.map(|(d, _)| d.id.clone()),
            kalshi.map(|(d, _)| d.id.clone()),
            confidence,
            None,
            &existing_by_symbol,
            inputs.now,
        ));
    }

    dedupe_reference_legs(&mut matched);

    let added = matched
        .iter()
        .filter(|m| !existing_by_symbol.contains_key(m.gemini_symbol.as_str()))
        .count();
    let refreshed = matched.len() - added;
    let vanished = inputs
        .existing
        .iter()
        .filter(|e| !matched.iter().any(|m| m.gemini_symbol == e.gemini_symbol))
        .count();

    info!(
        total = matched.len(),
        added, refreshed, vanished, "match cycle complete"
    );

    MatchOutcome {
        markets: matched,
        added,
        refreshed,
        vanished,
    }
}

fn build_market(
    g: &MarketDescriptor,
    polymarket_id: Option<String>,
    kalshi_id: Option<String>,
    confidence: f64,
    structural: Option<StructuralMeta>,
    existing_by_symbol: &HashMap<&str, &MatchedMarket>,
    now: i64,
) -> MatchedMarket {
    let (id, first_seen_ts) = match existing_by_symbol.get(g.id.as_str()) {
        Some(prev) => (prev.id.clone(), prev.first_seen_ts),
        None => (Uuid::new_v4().to_string(), now),
    };
    MatchedMarket {
        id,
        gemini_symbol: g.id.clone(),
        polymarket_id,
        kalshi_id,
        category: g.category,
        title: g.title.clone(),
        confidence,
        structural,
        first_seen_ts,
        last_seen_ts: now,
    }
}

/// Structural (asset, strike, expiry) match against Kalshi bracket events.
fn structural_match(
    g: &MarketDescriptor,
    kalshi_by_event: &HashMap<&str, Vec<&MarketDescriptor>>,
    existing_by_symbol: &HashMap<&str, &MatchedMarket>,
    now: i64,
) -> Option<MatchedMarket> {
    let parsed = parse_gemini_symbol(&g.id)?;

    // Best event by expiry agreement.
    let mut best: Option<(&str, f64, i64)> = None;
    for (&event, _) in kalshi_by_event.iter() {
        let Some(asset) = asset_from_kalshi_event(event) else {
            continue;
        };
        if asset != parsed.asset {
            continue;
        }
        let Some(event_expiry) = parse_kalshi_event_expiry(event) else {
            continue;
        };
        let Some(conf) = expiry_confidence(parsed.expiry_ts, event_expiry) else {
            debug!(symbol = %g.id, event, "expiry delta too large, rejected");
            continue;
        };
        let better = match best {
            Some((_, best_conf, _)) => conf > best_conf,
            None => true,
        };
        if better {
            best = Some((event, conf, event_expiry));
        }
    }

    let (event, confidence, _) = best?;
    let brackets = bind_brackets(
        parsed.payoff,
        parsed.strike,
        &kalshi_by_event[event]
            .iter()
            .map(|d| (*d).clone())
            .collect::<Vec<_>>(),
    );
    if brackets.is_empty() {
        debug!(symbol = %g.id, event, "no brackets cover the payoff range");
        return None;
    }

    let structural = StructuralMeta {
        asset: parsed.asset.clone(),
        strike: parsed.strike,
        expiry_ts: parsed.expiry_ts,
        payoff: parsed.payoff,
        brackets,
    };
    Some(build_market(
        g,
        None,
        Some(event.to_string()),
        confidence,
        Some(structural),
        existing_by_symbol,
        now,
    ))
}

fn parse_structural(
    g: &MarketDescriptor,
    kalshi_event: Option<&str>,
    kalshi_by_event: &HashMap<&str, Vec<&MarketDescriptor>>,
) -> Option<StructuralMeta> {
    let parsed = parse_gemini_symbol(&g.id)?;
    let brackets = kalshi_event
        .and_then(|event| kalshi_by_event.get(event))
        .map(|markets| {
            bind_brackets(
                parsed.payoff,
                parsed.strike,
                &markets.iter().map(|d| (*d).clone()).collect::<Vec<_>>(),
            )
        })
        .unwrap_or_default();
    Some(StructuralMeta {
        asset: parsed.asset,
        strike: parsed.strike,
        expiry_ts: parsed.expiry_ts,
        payoff: parsed.payoff,
        brackets,
    })
}

/// Enforce at most one venue-A market per reference-venue leg: when two
/// A-markets claim the same Polymarket or Kalshi id, the lower-confidence
/// claim loses that leg (and drops entirely if it loses both).
fn dedupe_reference_legs(matched: &mut Vec<MatchedMarket>) {
    let mut order: Vec<usize> = (0..matched.len()).collect();
    order.sort_by(|&a, &b| matched[b].confidence.total_cmp(&matched[a].confidence));

    let mut poly_taken: HashMap<String, ()> = HashMap::new();
    let mut kalshi_taken: HashMap<String, ()> = HashMap::new();

    for idx in order {
        let m = &mut matched[idx];
        if let Some(pid) = m.polymarket_id.clone() {
            if poly_taken.insert(pid, ()).is_some() {
                m.polymarket_id = None;
            }
        }
        // Kalshi legs are exclusive only for fuzzy (non-structural) bindings;
        // several strikes legitimately share one bracket event.
        if m.structural.is_none() {
            if let Some(kid) = m.kalshi_id.clone() {
                if kalshi_taken.insert(kid, ()).is_some() {
                    m.kalshi_id = None;
                }
            }
        }
    }

    matched.retain(|m| {
        m.structural.is_some() || m.polymarket_id.is_some() || m.kalshi_id.is_some()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payoff;

    fn gemini(id: &str, title: &str, category: Category) -> MarketDescriptor {
        MarketDescriptor {
            id: id.to_string(),
            title: title.to_string(),
            category,
            close_ts: None,
            floor_strike: None,
            cap_strike: None,
            volume: None,
            event_id: None,
        }
    }

    fn kalshi_bracket(id: &str, event: &str, floor: Option<f64>, cap: Option<f64>) -> MarketDescriptor {
        MarketDescriptor {
            id: id.to_string(),
            title: id.to_string(),
            category: Category::Crypto,
            close_ts: None,
            floor_strike: floor,
            cap_strike: cap,
            volume: Some(500.0),
            event_id: Some(event.to_string()),
        }
    }

    #[test]
    fn structural_match_binds_event_and_brackets() {
        // Gemini expiry 2026-02-04 22:00 UTC == Kalshi 26FEB0417 (17:00 EST).
        let g = vec![gemini(
            "GEMI-BTC2602042200-HI67500",
            "BTC above 67500",
            Category::Crypto,
        )];
        let k = vec![
            kalshi_bracket("K-65-70", "KXBTCD-26FEB0417", Some(65_000.0), Some(70_000.0)),
            kalshi_bracket("K-70-75", "KXBTCD-26FEB0417", Some(70_000.0), Some(75_000.0)),
            kalshi_bracket("K-75-up", "KXBTCD-26FEB0417", Some(75_000.0), None),
        ];
        let out = run_cycle(MatchInputs {
            gemini: &g,
            polymarket: &[],
            kalshi: &k,
            existing: &[],
            overrides: &[],
            now: 1_000,
        });

        assert_eq!(out.markets.len(), 1);
        let m = &out.markets[0];
        assert_eq!(m.kalshi_id.as_deref(), Some("KXBTCD-26FEB0417"));
        assert_eq!(m.confidence, 1.0);
        let s = m.structural.as_ref().unwrap();
        assert_eq!(s.payoff, Payoff::Above);
        assert_eq!(s.brackets, vec!["K-70-75".to_string(), "K-75-up".to_string()]);
    }

    #[test]
    fn expiry_mismatch_beyond_48h_rejected() {
        let g = vec![gemini(
            "GEMI-BTC2602102200-HI67500",
            "BTC above 67500",
            Category::Crypto,
        )];
        let k = vec![kalshi_bracket(
            "K-70-75",
            "KXBTCD-26FEB0417",
            Some(70_000.0),
            Some(75_000.0),
        )];
        let out = run_cycle(MatchInputs {
            gemini: &g,
            polymarket: &[],
            kalshi: &k,
            existing: &[],
            overrides: &[],
            now: 1_000,
        });
        assert!(out.markets.is_empty());
    }

    #[test]
    fn fuzzy_match_ties_polymarket_leg() {
        let g = vec![gemini(
            "GEMI-SB-CHIEFS",
            "Will the Chiefs win Super Bowl LX?",
            Category::Sports,
        )];
        let p = vec![gemini("pm-1", "Chiefs to win Super Bowl LX", Category::Sports)];
        let out = run_cycle(MatchInputs {
            gemini: &g,
            polymarket: &p,
            kalshi: &[],
            existing: &[],
            overrides: &[],
            now: 1_000,
        });
        assert_eq!(out.markets.len(), 1);
        assert_eq!(out.markets[0].polymarket_id.as_deref(), Some("pm-1"));
        assert!(out.markets[0].confidence >= fuzzy::MATCH_THRESHOLD);
        assert_eq!(out.added, 1);
    }

    #[test]
    fn existing_id_and_first_seen_survive_rematch() {
        let g = vec![gemini(
            "GEMI-SB-CHIEFS",
            "Will the Chiefs win Super Bowl LX?",
            Category::Sports,
        )];
        let p = vec![gemini("pm-1", "Chiefs to win Super Bowl LX", Category::Sports)];
        let first = run_cycle(MatchInputs {
            gemini: &g,
            polymarket: &p,
            kalshi: &[],
            existing: &[],
            overrides: &[],
            now: 1_000,
        });
        let second = run_cycle(MatchInputs {
            gemini: &g,
            polymarket: &p,
            kalshi: &[],
            existing: &first.markets,
            overrides: &[],
            now: 2_000,
        });
        assert_eq!(second.markets[0].id, first.markets[0].id);
        assert_eq!(second.markets[0].first_seen_ts, 1_000);
        assert_eq!(second.markets[0].last_seen_ts, 2_000);
        assert_eq!(second.refreshed, 1);
    }

    #[test]
    fn one_reference_leg_per_a_market() {
        // Two A-markets fuzzy-matching the same Polymarket market: the
        // higher-confidence claim keeps the leg.
        let g = vec![
            gemini("GEMI-SB-1", "Chiefs to win Super Bowl LX", Category::Sports),
            gemini("GEMI-SB-2", "Will the Chiefs win Super Bowl LX game?", Category::Sports),
        ];
        let p = vec![gemini("pm-1", "Chiefs to win Super Bowl LX", Category::Sports)];
        let out = run_cycle(MatchInputs {
            gemini: &g,
            polymarket: &p,
            kalshi: &[],
            existing: &[],
            overrides: &[],
            now: 1_000,
        });
        let holders: Vec<_> = out
            .markets
            .iter()
            .filter(|m| m.polymarket_id.as_deref() == Some("pm-1"))
            .collect();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].gemini_symbol, "GEMI-SB-1");
    }

    #[test]
    fn manual_override_wins_with_full_confidence() {
        let g = vec![gemini(
            "GEMI-ELEC-OH",
            "Ohio senate winner 2026",
            Category::Elections,
        )];
        let ov = vec![ManualOverride {
            gemini_symbol: "GEMI-ELEC-OH".to_string(),
            polymarket_id: Some("pm-ohio".to_string()),
            kalshi_id: None,
            title: "Ohio senate winner 2026".to_string(),
            category: Category::Elections,
        }];
        let out = run_cycle(MatchInputs {
            gemini: &g,
            polymarket: &[],
            kalshi: &[],
            existing: &[],
            overrides: &ov,
            now: 1_000,
        });
        assert_eq!(out.markets.len(), 1);
        assert_eq!(out.markets[0].confidence, 1.0);
        assert_eq!(out.markets[0].polymarket_id.as_deref(), Some("pm-ohio"));
    }
}
