//! Pre-trade guards.
//!
//! Evaluated in a fixed order; the first failing guard rejects the entry with
//! a reason code that lands in the audit log. Guards never mutate state.

use serde::Serialize;

use crate::models::{Direction, Signal};
use crate::store::params::Params;
use crate::venues::BookTop;

/// Moneyness bounds for the crypto direction-sanity guard.
const DEEP_ITM_RATIO: f64 = 1.20;
const DEEP_OTM_RATIO: f64 = 0.80;

/// NO entries below this price have uncontrolled downside.
const NO_LEVERAGE_MIN_PRICE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotRunning,
    CircuitOpen,
    KillSwitch,
    DailyLossLimit,
    MaxConcurrent,
    CategoryCap,
    DuplicatePosition,
    OrderAttemptCap,
    OneSidedBook,
    WideSpread,
    ThinDepth,
    EdgeBelowSpread,
    DeepItm,
    DeepOtm,
    NoLeverage,
    NotLiveInstrument,
    InsufficientBalance,
    BelowMinSize,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotRunning => "not_running",
            RejectReason::CircuitOpen => "circuit_open",
            RejectReason::KillSwitch => "kill_switch",
            RejectReason::DailyLossLimit => "daily_loss_limit",
            RejectReason::MaxConcurrent => "max_concurrent",
            RejectReason::CategoryCap => "category_cap",
            RejectReason::DuplicatePosition => "duplicate_position",
            RejectReason::OrderAttemptCap => "order_attempt_cap",
            RejectReason::OneSidedBook => "one_sided_book",
            RejectReason::WideSpread => "wide_spread",
            RejectReason::ThinDepth => "thin_depth",
            RejectReason::EdgeBelowSpread => "edge_below_spread",
            RejectReason::DeepItm => "deep_itm",
            RejectReason::DeepOtm => "deep_otm",
            RejectReason::NoLeverage => "no_leverage",
            RejectReason::NotLiveInstrument => "not_live_instrument",
            RejectReason::InsufficientBalance => "insufficient_balance",
            RejectReason::BelowMinSize => "below_min_size",
        }
    }
}

/// State assembled by the engine for one entry attempt.
pub struct GuardContext<'a> {
    pub running: bool,
    pub circuit_open: bool,
    pub kill_switch: bool,
    /// Today's realized PnL (negative = loss).
    pub daily_pnl: f64,
    pub open_count: usize,
    pub open_in_category: usize,
    pub has_open_on_market: bool,
    /// Live order submissions already attempted this cycle.
    pub live_attempts_this_cycle: usize,
    /// This entry will submit a real order (live process AND live instrument).
    pub is_live: bool,
    /// The process may execute live orders at all.
    pub live_capable: bool,
    /// The symbol carries the real-instrument prefix.
    pub live_instrument: bool,
    pub book: Option<&'a BookTop>,
    /// Gemini spread at decision time.
    pub spread: f64,
    /// Entry price for the side being bought.
    pub side_price: f64,
    /// Contracts the sizing step wants to buy.
    pub qty: f64,
    /// Notional in dollars.
    pub notional: f64,
    /// Fresh venue balance, live entries only.
    pub available_balance: Option<f64>,
    /// Parsed strike and live spot, crypto only.
    pub strike: Option<f64>,
    pub spot: Option<f64>,
}

/// Run the guard chain. `None` means the entry may proceed.
pub fn evaluate(signal: &Signal, ctx: &GuardContext<'_>, params: &Params) -> Option<RejectReason> {
    // 1. Global halts.
    if !ctx.running {
        return Some(RejectReason::NotRunning);
    }
    if ctx.circuit_open {
        return Some(RejectReason::CircuitOpen);
    }
    if ctx.kill_switch {
        return Some(RejectReason::KillSwitch);
    }
    if ctx.daily_pnl <= -params.daily_loss_limit() {
        return Some(RejectReason::DailyLossLimit);
    }

    // 2. Concurrency.
    if ctx.open_count >= params.max_concurrent() {
        return Some(RejectReason::MaxConcurrent);
    }
    if ctx.open_in_category >= params.max_per_category() {
        return Some(RejectReason::CategoryCap);
    }
    if ctx.has_open_on_market {
        return Some(RejectReason::DuplicatePosition);
    }
    if ctx.is_live && ctx.live_attempts_this_cycle >= params.live_order_attempts() {
        return Some(RejectReason::OrderAttemptCap);
    }

    // 3. Liquidity, live only.
    if ctx.is_live {
        let Some(book) = ctx.book else {
            return Some(RejectReason::OneSidedBook);
        };
        if !book.two_sided() {
            return Some(RejectReason::OneSidedBook);
        }
        if book.spread().unwrap_or(1.0) > params.max_spread_live() {
            return Some(RejectReason::WideSpread);
        }
        let side_depth = match signal.direction {
            Direction::Yes => book.ask_qty(),
            Direction::No => book.bid_qty(),
        };
        if side_depth < ctx.qty {
            return Some(RejectReason::ThinDepth);
        }
    }

    // 4. Spread-aware edge: twice the half-spread plus a penny, or the stop
    // width, whichever is worse.
    let edge_floor = params.stop_loss_width().max(ctx.spread + 0.01);
    if signal.net_edge <= edge_floor {
        return Some(RejectReason::EdgeBelowSpread);
    }

    // 5. Direction sanity, crypto only.
    if let (Some(strike), Some(spot)) = (ctx.strike, ctx.spot) {
        if signal.direction == Direction::No && spot > strike * DEEP_ITM_RATIO {
            return Some(RejectReason::DeepItm);
        }
        if signal.direction == Direction::Yes && spot < strike * DEEP_OTM_RATIO {
            return Some(RejectReason::DeepOtm);
        }
    }

    // 6. NO-leverage.
    if signal.direction == Direction::No && ctx.side_price < NO_LEVERAGE_MIN_PRICE {
        return Some(RejectReason::NoLeverage);
    }

    // 7. Mode gate: instruments outside the live prefix only ever route to
    // paper. A strategy that needs a real fill is rejected here rather than
    // silently simulated.
    if ctx.live_capable && !ctx.live_instrument && signal.strategy.requires_live_fill() {
        return Some(RejectReason::NotLiveInstrument);
    }

    // 8. Balance, live only.
    if ctx.is_live {
        match ctx.available_balance {
            Some(balance) if balance >= params.min_live_balance() => {}
            _ => return Some(RejectReason::InsufficientBalance),
        }
    }

    // 9. Minimum size.
    if ctx.notional < 1.0 {
        return Some(RejectReason::BelowMinSize);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuoteSnapshot, StrategyTag};

    fn signal(direction: Direction, net_edge: f64) -> Signal {
        Signal {
            matched_id: "mm-1".to_string(),
            gemini_symbol: "GEMI-BTC2602041700-HI67500".to_string(),
            category: crate::models::Category::Crypto,
            direction,
            score: 70.0,
            net_edge,
            confidence: 0.8,
            kelly: Some(0.17),
            strategy: StrategyTag::FairValue,
            quotes: QuoteSnapshot::default(),
            breakdown: None,
        }
    }

    fn open_book() -> BookTop {
        BookTop {
            bid: Some((0.57, 400.0)),
            ask: Some((0.61, 400.0)),
        }
    }

    fn ctx<'a>(book: &'a BookTop) -> GuardContext<'a> {
        GuardContext {
            running: true,
            circuit_open: false,
            kill_switch: false,
            daily_pnl: 0.0,
            open_count: 0,
            open_in_category: 0,
            has_open_on_market: false,
            live_attempts_this_cycle: 0,
            is_live: false,
            live_capable: false,
            live_instrument: true,
            book: Some(book),
            spread: 0.04,
            side_price: 0.59,
            qty: 16.9,
            notional: 10.0,
            available_balance: None,
            strike: None,
            spot: None,
        }
    }

    #[test]
    fn clean_entry_passes() {
        let book = open_book();
        let params = Params::defaults();
        assert_eq!(evaluate(&signal(Direction::Yes, 0.12), &ctx(&book), &params), None);
    }

    #[test]
    fn guard_order_global_first() {
        let book = open_book();
        let params = Params::defaults();
        let mut c = ctx(&book);
        c.running = false;
        c.kill_switch = true;
        c.has_open_on_market = true;
        assert_eq!(
            evaluate(&signal(Direction::Yes, 0.12), &c, &params),
            Some(RejectReason::NotRunning)
        );
    }

    #[test]
    fn daily_loss_limit_blocks() {
        let book = open_book();
        let params = Params::defaults();
        let mut c = ctx(&book);
        c.daily_pnl = -params.daily_loss_limit() - 1.0;
        assert_eq!(
            evaluate(&signal(Direction::Yes, 0.12), &c, &params),
            Some(RejectReason::DailyLossLimit)
        );
    }

    #[test]
    fn duplicate_position_blocked() {
        let book = open_book();
        let params = Params::defaults();
        let mut c = ctx(&book);
        c.has_open_on_market = true;
        assert_eq!(
            evaluate(&signal(Direction::Yes, 0.12), &c, &params),
            Some(RejectReason::DuplicatePosition)
        );
    }

    #[test]
    fn live_liquidity_checks() {
        let params = Params::defaults();
        let book = open_book();

        let mut c = ctx(&book);
        c.is_live = true;
        c.live_capable = true;
        c.available_balance = Some(100.0);
        assert_eq!(evaluate(&signal(Direction::Yes, 0.12), &c, &params), None);

        // Thin depth on the taken side.
        let thin = BookTop {
            bid: Some((0.57, 400.0)),
            ask: Some((0.61, 5.0)),
        };
        let mut c = ctx(&thin);
        c.is_live = true;
        c.live_capable = true;
        c.available_balance = Some(100.0);
        assert_eq!(
            evaluate(&signal(Direction::Yes, 0.12), &c, &params),
            Some(RejectReason::ThinDepth)
        );

        // Wide spread.
        let wide = BookTop {
            bid: Some((0.30, 400.0)),
            ask: Some((0.61, 400.0)),
        };
        let mut c = ctx(&wide);
        c.is_live = true;
        c.live_capable = true;
        c.available_balance = Some(100.0);
        assert_eq!(
            evaluate(&signal(Direction::Yes, 0.12), &c, &params),
            Some(RejectReason::WideSpread)
        );
    }

    #[test]
    fn edge_must_clear_spread_floor() {
        let book = open_book();
        let params = Params::defaults();
        // Floor = max(stop width 0.05, spread 0.04 + 0.01) = 0.05.
        assert_eq!(
            evaluate(&signal(Direction::Yes, 0.04), &ctx(&book), &params),
            Some(RejectReason::EdgeBelowSpread)
        );
        assert_eq!(evaluate(&signal(Direction::Yes, 0.06), &ctx(&book), &params), None);
    }

    #[test]
    fn deep_itm_no_rejected() {
        // Spot 72,000 far above strike 60,000: a NO is fighting reality.
        let book = open_book();
        let params = Params::defaults();
        let mut c = ctx(&book);
        c.strike = Some(60_000.0);
        c.spot = Some(72_000.0);
        c.side_price = 0.06;
        assert_eq!(
            evaluate(&signal(Direction::No, 0.20), &c, &params),
            Some(RejectReason::DeepItm)
        );
    }

    #[test]
    fn deep_otm_yes_rejected() {
        let book = open_book();
        let params = Params::defaults();
        let mut c = ctx(&book);
        c.strike = Some(90_000.0);
        c.spot = Some(67_800.0);
        assert_eq!(
            evaluate(&signal(Direction::Yes, 0.20), &c, &params),
            Some(RejectReason::DeepOtm)
        );
    }

    #[test]
    fn no_leverage_guard() {
        // NO proposed at 3c with a fat edge still rejected.
        let book = open_book();
        let params = Params::defaults();
        let mut c = ctx(&book);
        c.side_price = 0.03;
        assert_eq!(
            evaluate(&signal(Direction::No, 0.20), &c, &params),
            Some(RejectReason::NoLeverage)
        );
    }

    #[test]
    fn mode_gate_rejects_live_only_strategy_on_paper_instrument() {
        let book = open_book();
        let params = Params::defaults();

        // Live-capable process, instrument outside the live prefix.
        let mut c = ctx(&book);
        c.live_capable = true;
        c.live_instrument = false;

        let mut arb = signal(Direction::Yes, 0.12);
        arb.strategy = StrategyTag::SyntheticArb;
        assert_eq!(
            evaluate(&arb, &c, &params),
            Some(RejectReason::NotLiveInstrument)
        );

        // A composite signal on the same instrument legitimately routes to
        // paper instead.
        assert_eq!(evaluate(&signal(Direction::Yes, 0.12), &c, &params), None);

        // On a live-prefixed instrument the arb passes the gate.
        let mut c = ctx(&book);
        c.live_capable = true;
        c.live_instrument = true;
        let mut arb = signal(Direction::Yes, 0.12);
        arb.strategy = StrategyTag::SyntheticArb;
        assert_eq!(evaluate(&arb, &c, &params), None);
    }

    #[test]
    fn live_balance_required() {
        let book = open_book();
        let params = Params::defaults();
        let mut c = ctx(&book);
        c.is_live = true;
        c.live_capable = true;
        c.available_balance = Some(5.0);
        assert_eq!(
            evaluate(&signal(Direction::Yes, 0.12), &c, &params),
            Some(RejectReason::InsufficientBalance)
        );
    }

    #[test]
    fn sub_dollar_size_skipped() {
        let book = open_book();
        let params = Params::defaults();
        let mut c = ctx(&book);
        c.notional = 0.5;
        assert_eq!(
            evaluate(&signal(Direction::Yes, 0.12), &c, &params),
            Some(RejectReason::BelowMinSize)
        );
    }
}
