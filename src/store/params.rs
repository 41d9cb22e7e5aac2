//! Tunable parameter set.
//!
//! Every scalar the learning cycle or the operator can touch lives in the
//! `parameters` table as (key, value, min, max). Writes clamp to [min, max].
//! The fast loop never reads the table directly: it reads an immutable
//! [`Params`] snapshot swapped via `arc-swap` at the top of each iteration,
//! so a mid-iteration write cannot produce inconsistent component weights.

use std::collections::HashMap;

/// (key, default, min, max). Min/max are the clamp interval; hard caps are
/// expressed as the interval edge and are never moved at runtime.
pub const PARAM_DEFAULTS: &[(&str, f64, f64, f64)] = &[
    ("score_threshold", 55.0, 45.0, 80.0),
    ("min_edge_paper", 0.03, 0.005, 0.10),
    ("min_edge_live", 0.08, 0.01, 0.20),
    // Fractional-Kelly multiplier, adaptive.
    ("kelly_fraction", 0.10, 0.02, 0.25),
    // Hard ceiling on f*, not adaptive.
    ("kelly_ceiling", 0.25, 0.05, 0.25),
    ("fee_per_side", 0.0001, 0.0, 0.01),
    ("stop_loss_width", 0.05, 0.01, 0.20),
    ("take_profit_floor", 0.015, 0.005, 0.10),
    ("max_hold_secs", 14_400.0, 300.0, 604_800.0),
    ("max_concurrent", 10.0, 1.0, 50.0),
    ("max_per_category", 4.0, 1.0, 20.0),
    ("daily_loss_limit", 50.0, 1.0, 10_000.0),
    ("drawdown_kill_pct", 0.20, 0.05, 0.50),
    ("direction_threshold", 0.015, 0.005, 0.05),
    ("min_live_balance", 25.0, 1.0, 10_000.0),
    ("max_position_size", 10.0, 1.0, 1_000.0),
    ("max_position_pct", 0.12, 0.01, 0.50),
    ("volatility", 0.50, 0.05, 3.0),
    ("live_order_attempts", 3.0, 1.0, 10.0),
    ("quote_staleness_secs", 30.0, 5.0, 300.0),
    ("max_spread_live", 0.15, 0.01, 0.50),
    ("learning_pnl_floor", 0.05, 0.0, 10.0),
    // Composite component weights (points).
    ("w_velocity", 15.0, 0.0, 30.0),
    ("w_spread_diff", 15.0, 0.0, 30.0),
    ("w_consensus", 25.0, 0.0, 40.0),
    ("w_staleness", 15.0, 0.0, 30.0),
    ("w_category", 20.0, 0.0, 30.0),
    ("w_liquidity", 15.0, 0.0, 30.0),
    // Category ensemble weights.
    ("ens_crypto_kalshi", 0.70, 0.0, 1.0),
    ("ens_crypto_bs", 0.30, 0.0, 1.0),
    ("ens_politics_pm", 0.45, 0.0, 1.0),
    ("ens_politics_kalshi", 0.30, 0.0, 1.0),
    ("ens_politics_oracle", 0.25, 0.0, 1.0),
    ("ens_sports_oracle", 0.40, 0.0, 1.0),
    ("ens_sports_pm", 0.35, 0.0, 1.0),
    ("ens_sports_kalshi", 0.25, 0.0, 1.0),
    ("ens_default_pm", 0.55, 0.0, 1.0),
    ("ens_default_kalshi", 0.45, 0.0, 1.0),
];

/// Keys the learning cycle is allowed to write. Everything else is operator-only
/// or a hard cap.
pub const LEARNABLE_KEYS: &[&str] = &["score_threshold", "kelly_fraction"];

/// Clamp a candidate value for `key` into its configured interval.
pub fn clamp_param(key: &str, value: f64, min: f64, max: f64) -> f64 {
    let _ = key;
    value.clamp(min, max)
}

/// Immutable snapshot of all parameters, taken once per fast-loop iteration.
#[derive(Debug, Clone)]
pub struct Params {
    map: HashMap<String, f64>,
}

impl Params {
    pub fn from_map(map: HashMap<String, f64>) -> Self {
        Self { map }
    }

    /// Defaults only; used by tests and by startup before the store is seeded.
    pub fn defaults() -> Self {
        let map = PARAM_DEFAULTS
            .iter()
            .map(|(k, v, _, _)| (k.to_string(), *v))
            .collect();
        Self { map }
    }

    pub fn get(&self, key: &str) -> f64 {
        if let Some(v) = self.map.get(key) {
            return *v;
        }
        PARAM_DEFAULTS
            .iter()
            .find(|(k, _, _, _)| *k == key)
            .map(|(_, v, _, _)| *v)
            .unwrap_or(0.0)
    }

    pub fn score_threshold(&self) -> f64 {
        self.get("score_threshold")
    }

    pub fn min_edge(&self, live: bool) -> f64 {
        if live {
            self.get("min_edge_live")
        } else {
            self.get("min_edge_paper")
        }
    }

    pub fn kelly_fraction(&self) -> f64 {
        self.get("kelly_fraction")
    }

    pub fn kelly_ceiling(&self) -> f64 {
        self.get("kelly_ceiling")
    }

    pub fn fee_per_side(&self) -> f64 {
        self.get("fee_per_side")
    }

    pub fn stop_loss_width(&self) -> f64 {
        self.get("stop_loss_width")
    }

    pub fn take_profit_floor(&self) -> f64 {
        self.get("take_profit_floor")
    }

    pub fn max_hold_secs(&self) -> i64 {
        self.get("max_hold_secs") as i64
    }

    pub fn max_concurrent(&self) -> usize {
        self.get("max_concurrent") as usize
    }

    pub fn max_per_category(&self) -> usize {
        self.get("max_per_category") as usize
    }

    pub fn daily_loss_limit(&self) -> f64 {
        self.get("daily_loss_limit")
    }

    pub fn drawdown_kill_pct(&self) -> f64 {
        self.get("drawdown_kill_pct")
    }

    pub fn direction_threshold(&self) -> f64 {
        self.get("direction_threshold")
    }

    pub fn min_live_balance(&self) -> f64 {
        self.get("min_live_balance")
    }

    pub fn max_position_size(&self) -> f64 {
        self.get("max_position_size")
    }

    pub fn max_position_pct(&self) -> f64 {
        self.get("max_position_pct")
    }

    pub fn volatility(&self) -> f64 {
        self.get("volatility")
    }

    pub fn live_order_attempts(&self) -> usize {
        self.get("live_order_attempts") as usize
    }

    pub fn quote_staleness_secs(&self) -> i64 {
        self.get("quote_staleness_secs") as i64
    }

    pub fn max_spread_live(&self) -> f64 {
        self.get("max_spread_live")
    }

    pub fn learning_pnl_floor(&self) -> f64 {
        self.get("learning_pnl_floor")
    }
}
