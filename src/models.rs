//! Shared domain types for the signal-and-trading pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Market category, shared across all three venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Crypto,
    Sports,
    Politics,
    Finance,
    Elections,
    Culture,
    Tech,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Crypto => "crypto",
            Category::Sports => "sports",
            Category::Politics => "politics",
            Category::Finance => "finance",
            Category::Elections => "elections",
            Category::Culture => "culture",
            Category::Tech => "tech",
            Category::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Category {
        match s.to_ascii_lowercase().as_str() {
            "crypto" => Category::Crypto,
            "sports" => Category::Sports,
            "politics" => Category::Politics,
            "finance" => Category::Finance,
            "elections" => Category::Elections,
            "culture" => Category::Culture,
            "tech" => Category::Tech,
            _ => Category::Other,
        }
    }

    pub const ALL: [Category; 8] = [
        Category::Crypto,
        Category::Sports,
        Category::Politics,
        Category::Finance,
        Category::Elections,
        Category::Culture,
        Category::Tech,
        Category::Other,
    ];
}

/// Side of a binary contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Yes,
    No,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Yes => "YES",
            Direction::No => "NO",
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Yes => Direction::No,
            Direction::No => Direction::Yes,
        }
    }
}

/// The three venues the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Gemini,
    Polymarket,
    Kalshi,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Gemini => "gemini",
            Venue::Polymarket => "polymarket",
            Venue::Kalshi => "kalshi",
        }
    }
}

/// One top-of-book sample for one market on one venue.
///
/// Depth fields are unavailable on the read-only venues' batch tickers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub bid_depth: Option<f64>,
    pub ask_depth: Option<f64>,
    /// Unix seconds at sampling time.
    pub ts: i64,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        (self.ask - self.bid).max(0.0)
    }

    pub fn age_secs(&self, now: i64) -> i64 {
        (now - self.ts).max(0)
    }

    /// Quotes older than the per-venue staleness threshold are unusable for entries.
    pub fn is_stale(&self, now: i64, threshold_secs: i64) -> bool {
        self.age_secs(now) > threshold_secs
    }

    pub fn two_sided(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0 && self.ask < 1.0
    }
}

/// Payoff direction of a crypto binary contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payoff {
    Above,
    Below,
}

/// Structural metadata parsed from crypto binary symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralMeta {
    pub asset: String,
    pub strike: f64,
    /// Contract expiry, unix seconds.
    pub expiry_ts: i64,
    pub payoff: Payoff,
    /// Kalshi bracket tickers bound to this contract, covering the payoff range.
    #[serde(default)]
    pub brackets: Vec<String>,
}

/// A (Gemini, Polymarket?, Kalshi?) triple representing the same prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedMarket {
    /// Stable opaque id.
    pub id: String,
    pub gemini_symbol: String,
    pub polymarket_id: Option<String>,
    /// Kalshi event ticker for structural matches, market ticker otherwise.
    pub kalshi_id: Option<String>,
    pub category: Category,
    pub title: String,
    /// Match confidence in [0, 1]. Manual overrides carry 1.0.
    pub confidence: f64,
    pub structural: Option<StructuralMeta>,
    pub first_seen_ts: i64,
    pub last_seen_ts: i64,
}

impl MatchedMarket {
    pub fn is_crypto_binary(&self) -> bool {
        self.category == Category::Crypto && self.structural.is_some()
    }
}

/// Probability source feeding the reference price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Polymarket,
    KalshiSynthetic,
    BlackScholes,
    Oracle(String),
}

impl PriceSource {
    pub fn label(&self) -> String {
        match self {
            PriceSource::Polymarket => "polymarket".to_string(),
            PriceSource::KalshiSynthetic => "kalshi_synthetic".to_string(),
            PriceSource::BlackScholes => "black_scholes".to_string(),
            PriceSource::Oracle(name) => format!("oracle:{name}"),
        }
    }
}

/// One contributing source probability with its post-redistribution weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProb {
    pub source: PriceSource,
    pub prob: f64,
    pub weight: f64,
}

/// Weighted reference probability for one matched market in one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencePrice {
    pub prob: f64,
    pub sources: Vec<SourceProb>,
    /// True when max-min source spread exceeded the disagreement threshold
    /// and the outlier was down-weighted.
    pub disagreement: bool,
}

/// Fair-value engine output for one crypto market in one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairValue {
    pub fair_value: f64,
    pub direction: Direction,
    /// Edge net of the venue-A half-spread, for the given direction.
    pub edge: f64,
    /// Kelly fraction clamped to the configured ceiling.
    pub kelly_fraction: f64,
    pub confidence: f64,
}

/// Strategy that produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    Composite,
    FairValue,
    Momentum,
    SyntheticArb,
    MultiSource,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTag::Composite => "composite",
            StrategyTag::FairValue => "fair_value",
            StrategyTag::Momentum => "momentum",
            StrategyTag::SyntheticArb => "synthetic_arb",
            StrategyTag::MultiSource => "multi_source",
        }
    }

    /// Strategies whose payoff depends on a real venue fill. A synthetic arb
    /// crosses two venues; simulating the Gemini leg leaves the plan
    /// half-executed, so it cannot fall back to paper.
    pub fn requires_live_fill(&self) -> bool {
        matches!(self, StrategyTag::SyntheticArb)
    }
}

/// Per-component breakdown of the composite score.
///
/// Field order matters: signals serialize to byte-stable JSON for replay
/// comparison, so this struct must not be reordered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub velocity: f64,
    pub spread_differential: f64,
    pub consensus: f64,
    pub staleness: f64,
    pub category_win_rate: f64,
    pub liquidity: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        (self.velocity
            + self.spread_differential
            + self.consensus
            + self.staleness
            + self.category_win_rate
            + self.liquidity)
            .min(100.0)
    }
}

/// Snapshot of the source quotes a signal was computed from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub gemini: Option<Quote>,
    pub polymarket: Option<Quote>,
    pub kalshi_synthetic: Option<f64>,
    pub reference: Option<f64>,
    pub spot: Option<f64>,
}

/// An actionable (or candidate) trading signal. Transient: expires at end of cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub matched_id: String,
    pub gemini_symbol: String,
    pub category: Category,
    pub direction: Direction,
    pub score: f64,
    pub net_edge: f64,
    pub confidence: f64,
    /// Engine-computed Kelly f*, when the producing strategy has one.
    pub kelly: Option<f64>,
    pub strategy: StrategyTag,
    pub quotes: QuoteSnapshot,
    pub breakdown: Option<ScoreBreakdown>,
}

/// Whether a position's fills and bookkeeping are simulated or real.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeMode {
    Paper,
    Live,
}

impl TradeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeMode::Paper => "paper",
            TradeMode::Live => "live",
        }
    }

    pub fn parse(s: &str) -> TradeMode {
        if s.eq_ignore_ascii_case("live") {
            TradeMode::Live
        } else {
            TradeMode::Paper
        }
    }
}

/// Position lifecycle. `Exiting` retries the close until the venue confirms.
/// `Phantom` marks store/venue mismatches found during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Nascent,
    Open,
    Exiting,
    Closed,
    Phantom,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Nascent => "nascent",
            PositionState::Open => "open",
            PositionState::Exiting => "exiting",
            PositionState::Closed => "closed",
            PositionState::Phantom => "phantom",
        }
    }

    pub fn parse(s: &str) -> PositionState {
        match s {
            "nascent" => PositionState::Nascent,
            "open" => PositionState::Open,
            "exiting" => PositionState::Exiting,
            "phantom" => PositionState::Phantom,
            _ => PositionState::Closed,
        }
    }
}

/// An open (or closing) position. Mode is fixed at entry and never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub matched_id: String,
    pub gemini_symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub qty: f64,
    pub notional: f64,
    pub entry_ts: i64,
    pub mode: TradeMode,
    pub category: Category,
    /// Take-profit price.
    pub tp: f64,
    /// Stop-loss price, trailed from the running mid each monitor pass.
    pub sl: f64,
    /// Hard deadline, unix seconds.
    pub max_hold_ts: i64,
    /// Highest realized mid since entry.
    pub high_water: f64,
    /// Lowest realized mid since entry.
    pub low_water: f64,
    pub state: PositionState,
}

impl Position {
    /// Unrealized PnL at the given mark price for this position's direction.
    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        (mark - self.entry_price) * self.qty
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TimeDecay,
    Expiry,
    Emergency,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TimeDecay => "time_decay",
            ExitReason::Expiry => "expiry",
            ExitReason::Emergency => "emergency",
            ExitReason::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> ExitReason {
        match s {
            "take_profit" => ExitReason::TakeProfit,
            "stop_loss" => ExitReason::StopLoss,
            "time_decay" => ExitReason::TimeDecay,
            "expiry" => ExitReason::Expiry,
            "emergency" => ExitReason::Emergency,
            _ => ExitReason::Manual,
        }
    }
}

/// Final record of a closed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: i64,
    pub position_id: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub qty: f64,
    pub exit_ts: i64,
    pub gross_pnl: f64,
    pub net_pnl: f64,
    pub fees: f64,
    pub exit_reason: ExitReason,
    pub mode: TradeMode,
    pub category: Category,
    /// Realized hold time in seconds.
    pub hold_secs: i64,
}

/// Wallet singleton. Updated atomically with each closed trade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Wallet {
    pub balance: f64,
    pub initial: f64,
    pub peak: f64,
    pub daily_pnl: f64,
    /// UTC-midnight anchor for the daily accumulator, unix seconds.
    pub daily_start_ts: i64,
}

impl Wallet {
    pub fn drawdown_pct(&self) -> f64 {
        if self.peak <= 0.0 {
            return 0.0;
        }
        ((self.peak - self.balance) / self.peak).clamp(0.0, 1.0)
    }
}

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Unix seconds of the most recent UTC midnight.
pub fn utc_midnight(now: i64) -> i64 {
    now - now.rem_euclid(86_400)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_mid_and_spread() {
        let q = Quote {
            bid: 0.57,
            ask: 0.61,
            last: 0.58,
            bid_depth: Some(200.0),
            ask_depth: Some(400.0),
            ts: 1_000,
        };
        assert!((q.mid() - 0.59).abs() < 1e-12);
        assert!((q.spread() - 0.04).abs() < 1e-12);
        assert!(q.is_stale(1_031, 30));
        assert!(!q.is_stale(1_030, 30));
    }

    #[test]
    fn breakdown_clamps_to_100() {
        let b = ScoreBreakdown {
            velocity: 15.0,
            spread_differential: 15.0,
            consensus: 25.0,
            staleness: 15.0,
            category_win_rate: 20.0,
            liquidity: 15.0,
        };
        assert_eq!(b.total(), 100.0);
    }

    #[test]
    fn wallet_drawdown() {
        let w = Wallet {
            balance: 460.0,
            initial: 500.0,
            peak: 575.0,
            daily_pnl: -40.0,
            daily_start_ts: 0,
        };
        assert!((w.drawdown_pct() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn utc_midnight_floors() {
        // 2026-02-04 13:30:05 UTC
        let ts = 1_770_211_805;
        let midnight = utc_midnight(ts);
        assert_eq!(midnight % 86_400, 0);
        assert!(ts - midnight < 86_400);
    }
}
