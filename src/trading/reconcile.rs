//! Store-vs-venue reconciliation.
//!
//! Hourly: compare live positions in the store against what Gemini reports.
//! A store position missing at the venue becomes `phantom` (no real exposure
//! behind it); a venue position with no store row is an orphan, surfaced via
//! the audit log for the operator. Paper positions have no venue counterpart
//! and are never touched.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{PositionState, TradeMode};
use crate::store::Store;
use crate::venues::gemini::GeminiClient;

#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Store position ids marked phantom this pass.
    pub phantoms: Vec<i64>,
    /// Venue symbols with exposure the store knows nothing about.
    pub orphans: Vec<String>,
}

pub async fn reconcile(
    store: &Store,
    gemini: &Arc<GeminiClient>,
    live_capable: bool,
    now: i64,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    if !live_capable {
        return Ok(report);
    }

    let venue_positions = gemini.positions().await?;
    let venue_by_symbol: HashMap<&str, f64> = venue_positions
        .iter()
        .map(|p| (p.symbol.as_str(), p.quantity))
        .collect();

    let open = store.open_positions().await?;
    for p in open.iter().filter(|p| p.mode == TradeMode::Live) {
        let venue_qty = venue_by_symbol.get(p.gemini_symbol.as_str()).copied();
        if venue_qty.map(|q| q > 0.0).unwrap_or(false) {
            continue;
        }
        warn!(
            position_id = p.id,
            symbol = %p.gemini_symbol,
            "live position absent at venue, marking phantom"
        );
        store.set_position_state(p.id, PositionState::Phantom).await?;
        store
            .audit(
                "reconcile_phantom",
                serde_json::json!({
                    "position_id": p.id,
                    "market": p.gemini_symbol,
                }),
                now,
            )
            .await?;
        report.phantoms.push(p.id);
    }

    for vp in &venue_positions {
        if vp.quantity <= 0.0 {
            continue;
        }
        let known = open
            .iter()
            .any(|p| p.mode == TradeMode::Live && p.gemini_symbol == vp.symbol);
        if !known {
            warn!(symbol = %vp.symbol, qty = vp.quantity, "venue position unknown to store");
            store
                .audit(
                    "reconcile_orphan",
                    serde_json::json!({
                        "market": vp.symbol,
                        "qty": vp.quantity,
                        "outcome": vp.outcome.as_str(),
                    }),
                    now,
                )
                .await?;
            report.orphans.push(vp.symbol.clone());
        }
    }

    info!(
        phantoms = report.phantoms.len(),
        orphans = report.orphans.len(),
        "reconciliation pass complete"
    );
    Ok(report)
}
