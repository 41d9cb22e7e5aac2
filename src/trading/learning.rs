//! Adaptive learning cycle.
//!
//! Every ~30 s, look at the last 50 closed trades and nudge the score
//! threshold and the fractional-Kelly multiplier: loosen when the book is
//! winning comfortably, tighten when it is losing. All writes go through the
//! clamped parameter store and are audited there. Fees, nonce state, and the
//! hard caps are never touched.

use anyhow::Result;
use tracing::info;

use crate::store::Store;

const WINDOW: usize = 50;
/// Below this many closed trades the sample is noise.
const MIN_TRADES: usize = 10;

const LOOSEN_WIN_RATE: f64 = 0.65;
const TIGHTEN_WIN_RATE: f64 = 0.50;
const THRESHOLD_STEP: f64 = 5.0;
const KELLY_STEP: f64 = 0.02;

const THRESHOLD_FLOOR: f64 = 45.0;
/// Live mode refuses to tighten past this ceiling.
const LIVE_THRESHOLD_CEILING: f64 = 65.0;
/// Live mode refuses to loosen Kelly past this cap.
const LIVE_KELLY_CAP: f64 = 0.20;

/// Consecutive zero-trigger tightens that force the starvation reset.
const STARVATION_TIGHTENS: u32 = 5;

pub struct LearningCycle {
    consecutive_tightens: u32,
    entries_at_last_tick: u64,
}

impl Default for LearningCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl LearningCycle {
    pub fn new() -> Self {
        Self {
            consecutive_tightens: 0,
            entries_at_last_tick: 0,
        }
    }

    /// One learning pass. `entries_opened` is the engine's lifetime entry
    /// counter; `live` selects the stricter clamps.
    pub async fn tick(
        &mut self,
        store: &Store,
        live: bool,
        entries_opened: u64,
        now: i64,
    ) -> Result<()> {
        let entries_since = entries_opened.saturating_sub(self.entries_at_last_tick);
        self.entries_at_last_tick = entries_opened;

        if entries_since > 0 {
            // Signals are triggering again; the tightening streak is over.
            self.consecutive_tightens = 0;
        }

        // Starvation: repeated tightening with nothing entered means the
        // threshold has choked the pipeline.
        if self.consecutive_tightens >= STARVATION_TIGHTENS {
            store.set_param("score_threshold", THRESHOLD_FLOOR, now).await?;
            store
                .audit(
                    "starvation_reset",
                    serde_json::json!({
                        "consecutive_tightens": self.consecutive_tightens,
                        "threshold": THRESHOLD_FLOOR,
                    }),
                    now,
                )
                .await?;
            info!("starvation reset: score threshold back to {THRESHOLD_FLOOR}");
            self.consecutive_tightens = 0;
            return Ok(());
        }

        let trades = store.recent_trades(WINDOW).await?;
        if trades.len() < MIN_TRADES {
            return Ok(());
        }

        let wins = trades.iter().filter(|t| t.net_pnl > 0.0).count();
        let win_rate = wins as f64 / trades.len() as f64;
        let avg_pnl = trades.iter().map(|t| t.net_pnl).sum::<f64>() / trades.len() as f64;

        let params = store.params_snapshot().await?;
        let threshold = params.score_threshold();
        let kelly = params.kelly_fraction();
        let pnl_floor = params.learning_pnl_floor();

        if win_rate > LOOSEN_WIN_RATE && avg_pnl > pnl_floor {
            let new_threshold = (threshold - THRESHOLD_STEP).max(THRESHOLD_FLOOR);
            let mut new_kelly = kelly + KELLY_STEP;
            if live {
                new_kelly = new_kelly.min(LIVE_KELLY_CAP);
            }
            store.set_param("score_threshold", new_threshold, now).await?;
            store.set_param("kelly_fraction", new_kelly, now).await?;
            self.consecutive_tightens = 0;
            info!(win_rate, avg_pnl, new_threshold, new_kelly, "learning: loosened");
        } else if win_rate < TIGHTEN_WIN_RATE {
            let mut new_threshold = threshold + THRESHOLD_STEP;
            if live {
                new_threshold = new_threshold.min(LIVE_THRESHOLD_CEILING);
            }
            let new_kelly = kelly - KELLY_STEP;
            store.set_param("score_threshold", new_threshold, now).await?;
            store.set_param("kelly_fraction", new_kelly, now).await?;
            if entries_since == 0 {
                self.consecutive_tightens += 1;
            }
            info!(win_rate, avg_pnl, new_threshold, new_kelly, "learning: tightened");
        }

        Ok(())
    }

    #[cfg(test)]
    fn tightens(&self) -> u32 {
        self.consecutive_tightens
    }
}
