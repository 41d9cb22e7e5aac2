//! Trading engine.
//!
//! Entry: guard chain, Kelly sizing, then a live GTC limit order or a
//! seeded paper fill. The paper simulator mirrors the live execution model
//! (fill at the side mid plus a maker increment, configured maker fee), so
//! paper results do not overstate live profitability.
//!
//! Monitoring: every tick each open position is re-marked from a fresh
//! Gemini quote; the stop trails the running mid, and exits fire in TP, SL,
//! time-decay, max-hold order. Live exits are real sell orders retried from
//! the `exiting` state until the venue confirms. Paper and live bookkeeping
//! never touch the other mode's positions.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Mode;
use crate::models::{
    Direction, ExitReason, Position, PositionState, Quote, Signal, TradeMode,
};
use crate::store::params::Params;
use crate::store::Store;
use crate::trading::guards::{self, GuardContext, RejectReason};
use crate::trading::sizing::{size_position, SizingInputs};
use crate::venues::gemini::GeminiClient;
use crate::venues::{BookTop, OrderRequest, OrderSide, VenueClient};

/// Maker increment applied to the side mid for simulated fills.
const PAPER_FILL_INCREMENT: f64 = 0.001;
/// Uniform jitter ceiling added to paper fills (seeded, reproducible).
const PAPER_FILL_JITTER: f64 = 0.0005;

/// Per-market state the entry path needs beyond the signal itself.
#[derive(Debug, Clone, Default)]
pub struct EntryMarketState {
    pub quote: Option<Quote>,
    pub book: Option<BookTop>,
    pub spot: Option<f64>,
    pub strike: Option<f64>,
    pub expiry_ts: Option<i64>,
}

/// Scheduler-owned flags snapshot for one tick.
#[derive(Debug, Clone)]
pub struct TickContext {
    pub running: bool,
    pub circuit_open: bool,
    pub kill_switch: bool,
    pub now: i64,
}

pub struct TradingEngine {
    store: Store,
    gemini: Arc<GeminiClient>,
    mode: Mode,
    live_prefix: String,
    fee_overrides: HashMap<String, f64>,
    paper_rng: Mutex<ChaCha8Rng>,
    entries_opened: AtomicU64,
    /// Exit reasons for positions stuck in `exiting`, keyed by position id.
    /// Rediscovered-as-exiting positions after a restart fall back to
    /// `emergency`.
    pending_exits: Mutex<HashMap<i64, ExitReason>>,
}

impl TradingEngine {
    pub fn new(
        store: Store,
        gemini: Arc<GeminiClient>,
        mode: Mode,
        live_prefix: String,
        fee_overrides: HashMap<String, f64>,
        paper_fill_seed: u64,
    ) -> Self {
        Self {
            store,
            gemini,
            mode,
            live_prefix,
            fee_overrides,
            paper_rng: Mutex::new(ChaCha8Rng::seed_from_u64(paper_fill_seed)),
            entries_opened: AtomicU64::new(0),
            pending_exits: Mutex::new(HashMap::new()),
        }
    }

    /// Total entries opened this process lifetime (learning starvation input).
    pub fn entries_opened(&self) -> u64 {
        self.entries_opened.load(Ordering::Relaxed)
    }

    fn fee_for(&self, symbol: &str, params: &Params) -> f64 {
        self.fee_overrides
            .get(symbol)
            .copied()
            .unwrap_or_else(|| params.fee_per_side())
    }

    /// Mode is scope: only live-prefixed instruments route real orders, and
    /// only while the process itself is in a live-capable mode.
    fn route_mode(&self, symbol: &str) -> TradeMode {
        if self.mode.executes_live() && symbol.starts_with(&self.live_prefix) {
            TradeMode::Live
        } else {
            TradeMode::Paper
        }
    }

    // ---- entries ----

    /// Process the cycle's actionable signals.
    pub async fn tick_entries(
        &self,
        signals: &[Signal],
        lookup: &HashMap<String, EntryMarketState>,
        params: &Params,
        ctx: &TickContext,
    ) -> Result<()> {
        let wallet = self.store.roll_daily(ctx.now).await?;
        let mut live_attempts = 0usize;

        for signal in signals {
            let Some(state) = lookup.get(&signal.gemini_symbol) else {
                continue;
            };
            let Some(quote) = state.quote else {
                continue;
            };
            if quote.is_stale(ctx.now, params.quote_staleness_secs()) {
                debug!(symbol = %signal.gemini_symbol, "stale quote, entry skipped");
                continue;
            }

            let mode = self.route_mode(&signal.gemini_symbol);
            let is_live = mode == TradeMode::Live;
            let live_instrument = signal.gemini_symbol.starts_with(&self.live_prefix);

            let side_price = match (signal.direction, is_live) {
                (Direction::Yes, true) => quote.ask,
                (Direction::No, true) => 1.0 - quote.bid,
                (Direction::Yes, false) => quote.mid() + PAPER_FILL_INCREMENT,
                (Direction::No, false) => (1.0 - quote.mid()) + PAPER_FILL_INCREMENT,
            };
            if !(side_price > 0.0 && side_price < 1.0) {
                continue;
            }

            let side_depth = match signal.direction {
                Direction::Yes => state
                    .book
                    .map(|b| b.ask_qty())
                    .or(quote.ask_depth)
                    .unwrap_or(0.0),
                Direction::No => state
                    .book
                    .map(|b| b.bid_qty())
                    .or(quote.bid_depth)
                    .unwrap_or(0.0),
            };

            let sizing = size_position(
                &SizingInputs {
                    wallet_balance: wallet.balance,
                    edge: signal.net_edge,
                    side_price,
                    engine_kelly: signal.kelly,
                    side_depth,
                },
                params,
            );

            let available_balance = if is_live {
                self.gemini.available_balance().await.ok()
            } else {
                None
            };

            let guard_ctx = GuardContext {
                running: ctx.running,
                circuit_open: ctx.circuit_open,
                kill_switch: ctx.kill_switch,
                daily_pnl: wallet.daily_pnl,
                open_count: self.store.open_count().await?,
                open_in_category: self.store.open_count_by_category(signal.category).await?,
                has_open_on_market: self.store.has_open_for_market(&signal.gemini_symbol).await?,
                live_attempts_this_cycle: live_attempts,
                is_live,
                live_capable: self.mode.executes_live(),
                live_instrument,
                book: state.book.as_ref(),
                spread: quote.spread(),
                side_price,
                qty: sizing.qty,
                notional: sizing.notional,
                available_balance,
                strike: state.strike,
                spot: state.spot,
            };

            let reject = if sizing.viable {
                guards::evaluate(signal, &guard_ctx, params)
            } else {
                Some(RejectReason::BelowMinSize)
            };
            if let Some(reason) = reject {
                self.audit_reject(signal, reason, ctx.now).await?;
                continue;
            }

            if is_live {
                live_attempts += 1;
            }
            match self
                .open_position(signal, state, mode, side_price, sizing.qty, params, ctx)
                .await
            {
                Ok(position_id) => {
                    self.entries_opened.fetch_add(1, Ordering::Relaxed);
                    info!(
                        symbol = %signal.gemini_symbol,
                        position_id,
                        direction = signal.direction.as_str(),
                        mode = mode.as_str(),
                        "position opened"
                    );
                }
                Err(e) => {
                    warn!(symbol = %signal.gemini_symbol, error = %e, "entry failed");
                    self.store
                        .audit(
                            "entry_failed",
                            serde_json::json!({
                                "market": signal.gemini_symbol,
                                "error": e.to_string(),
                            }),
                            ctx.now,
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_position(
        &self,
        signal: &Signal,
        state: &EntryMarketState,
        mode: TradeMode,
        side_price: f64,
        qty: f64,
        params: &Params,
        ctx: &TickContext,
    ) -> Result<i64> {
        let (entry_price, filled_qty, state_at_entry) = match mode {
            TradeMode::Live => {
                let order = OrderRequest {
                    symbol: signal.gemini_symbol.clone(),
                    side: OrderSide::Buy,
                    outcome: signal.direction,
                    quantity: qty,
                    price: side_price,
                    client_order_id: Uuid::new_v4().to_string(),
                    maker_only: true,
                };
                let report = self.gemini.place_order(&order).await.context("live entry")?;
                let price = report.avg_execution_price.unwrap_or(side_price);
                if report.filled_quantity > 0.0 {
                    (price, report.filled_quantity, PositionState::Open)
                } else {
                    // GTC order resting on the book: tracked as nascent until
                    // the venue reports a fill.
                    (side_price, qty, PositionState::Nascent)
                }
            }
            TradeMode::Paper => {
                let jitter = self.paper_rng.lock().gen_range(0.0..PAPER_FILL_JITTER);
                (side_price + jitter, qty, PositionState::Open)
            }
        };

        let target_from_signal = signal.quotes.reference.map(|r| match signal.direction {
            Direction::Yes => r,
            Direction::No => 1.0 - r,
        });
        let tp = target_from_signal
            .unwrap_or(0.0)
            .max(entry_price + params.take_profit_floor());
        let sl = entry_price - params.stop_loss_width();

        let max_hold_ts = match state.expiry_ts {
            Some(expiry) => {
                let tte = (expiry - ctx.now).max(0);
                let hold = params.max_hold_secs().max((tte as f64 * 0.8) as i64);
                (ctx.now + hold).min(expiry)
            }
            None => ctx.now + params.max_hold_secs(),
        };

        let position = Position {
            id: 0,
            matched_id: signal.matched_id.clone(),
            gemini_symbol: signal.gemini_symbol.clone(),
            direction: signal.direction,
            entry_price,
            qty: filled_qty,
            notional: entry_price * filled_qty,
            entry_ts: ctx.now,
            mode,
            category: signal.category,
            tp,
            sl,
            max_hold_ts,
            high_water: entry_price,
            low_water: entry_price,
            state: state_at_entry,
        };
        let id = self.store.insert_position(&position).await?;

        self.store
            .audit(
                "entry",
                serde_json::json!({
                    "position_id": id,
                    "market": signal.gemini_symbol,
                    "direction": signal.direction.as_str(),
                    "mode": mode.as_str(),
                    "strategy": signal.strategy.as_str(),
                    "entry_price": entry_price,
                    "qty": filled_qty,
                    "net_edge": signal.net_edge,
                    "score": signal.score,
                }),
                ctx.now,
            )
            .await?;
        Ok(id)
    }

    async fn audit_reject(&self, signal: &Signal, reason: RejectReason, now: i64) -> Result<()> {
        debug!(
            symbol = %signal.gemini_symbol,
            reason = reason.as_str(),
            "entry rejected"
        );
        self.store
            .audit(
                "guard_reject",
                serde_json::json!({
                    "market": signal.gemini_symbol,
                    "reason": reason.as_str(),
                    "strategy": signal.strategy.as_str(),
                    "direction": signal.direction.as_str(),
                    "net_edge": signal.net_edge,
                }),
                now,
            )
            .await
    }

    // ---- monitoring / exits ----

    /// One monitor pass over all open positions with this cycle's quotes.
    pub async fn monitor(
        &self,
        quotes: &HashMap<String, Quote>,
        params: &Params,
        ctx: &TickContext,
    ) -> Result<()> {
        let positions = self.store.open_positions().await?;
        for mut p in positions {
            let Some(quote) = quotes.get(&p.gemini_symbol).copied() else {
                // No fresh mark: an exiting live position still gets a retry
                // at its last known prices via the cached quote.
                if p.state == PositionState::Exiting {
                    if let Some(cached) = self.gemini.cached_quote(&p.gemini_symbol) {
                        let reason = self.pending_reason(p.id);
                        self.try_close(&p, &cached, reason, params, ctx).await?;
                    }
                }
                continue;
            };

            let side_mid = match p.direction {
                Direction::Yes => quote.mid(),
                Direction::No => 1.0 - quote.mid(),
            };

            p.high_water = p.high_water.max(side_mid);
            p.low_water = p.low_water.min(side_mid);
            // The stop trails the realized mid so one-sided spread widening
            // cannot trigger it spuriously.
            let trailed_sl = p.sl.max(side_mid - params.stop_loss_width());
            p.sl = trailed_sl;
            self.store
                .update_monitor(p.id, p.sl, p.high_water, p.low_water)
                .await?;

            // A resting entry that now has a market mark is live.
            if p.state == PositionState::Nascent {
                self.store.set_position_state(p.id, PositionState::Open).await?;
                p.state = PositionState::Open;
            }

            let reason = if p.state == PositionState::Exiting {
                Some(self.pending_reason(p.id))
            } else {
                self.exit_reason(&p, side_mid, ctx.now).await?
            };

            if let Some(reason) = reason {
                self.try_close(&p, &quote, reason, params, ctx).await?;
            }
        }
        Ok(())
    }

    fn pending_reason(&self, position_id: i64) -> ExitReason {
        self.pending_exits
            .lock()
            .get(&position_id)
            .copied()
            .unwrap_or(ExitReason::Emergency)
    }

    /// Exit checks in order: TP, SL, expiry-aware time-decay, max-hold.
    async fn exit_reason(
        &self,
        p: &Position,
        side_mid: f64,
        now: i64,
    ) -> Result<Option<ExitReason>> {
        if side_mid >= p.tp {
            return Ok(Some(ExitReason::TakeProfit));
        }
        if side_mid <= p.sl {
            return Ok(Some(ExitReason::StopLoss));
        }

        let window = (p.max_hold_ts - p.entry_ts).max(1);
        let decay_start = p.max_hold_ts - window / 5;
        if now >= decay_start && p.unrealized_pnl(side_mid) > 0.0 {
            return Ok(Some(ExitReason::TimeDecay));
        }

        if now >= p.max_hold_ts {
            let expired = match self.store.market_by_id(&p.matched_id).await? {
                Some(m) => m
                    .structural
                    .map(|s| now >= s.expiry_ts)
                    .unwrap_or(false),
                None => false,
            };
            return Ok(Some(if expired {
                ExitReason::Expiry
            } else {
                ExitReason::TimeDecay
            }));
        }
        Ok(None)
    }

    /// Attempt the close. Paper closes settle immediately; live closes must
    /// be acknowledged by the venue before any bookkeeping happens.
    async fn try_close(
        &self,
        p: &Position,
        quote: &Quote,
        reason: ExitReason,
        params: &Params,
        ctx: &TickContext,
    ) -> Result<()> {
        match p.mode {
            TradeMode::Paper => {
                let side_mid = match p.direction {
                    Direction::Yes => quote.mid(),
                    Direction::No => 1.0 - quote.mid(),
                };
                let exit_price = (side_mid - PAPER_FILL_INCREMENT).clamp(0.0, 1.0);
                let fee = self.fee_for(&p.gemini_symbol, params);
                let fees = (p.entry_price + exit_price) * p.qty * fee;
                self.store
                    .close_position(p, exit_price, fees, reason, ctx.now)
                    .await?;
                self.pending_exits.lock().remove(&p.id);
                info!(position_id = p.id, reason = reason.as_str(), "paper position closed");
            }
            TradeMode::Live => {
                // A live position must exit via a live sell, no matter what
                // mode the rest of the process believes it is in.
                if !self.mode.executes_live() {
                    self.store
                        .audit(
                            "invariant_violation",
                            serde_json::json!({
                                "position_id": p.id,
                                "detail": "live position in a paper-only process; exit withheld",
                            }),
                            ctx.now,
                        )
                        .await?;
                    warn!(position_id = p.id, "live position cannot be exited by a paper process");
                    return Ok(());
                }

                let exit_price_wanted = match p.direction {
                    Direction::Yes => quote.bid,
                    Direction::No => 1.0 - quote.ask,
                };
                let order = OrderRequest {
                    symbol: p.gemini_symbol.clone(),
                    side: OrderSide::Sell,
                    outcome: p.direction,
                    quantity: p.qty,
                    price: exit_price_wanted,
                    client_order_id: Uuid::new_v4().to_string(),
                    maker_only: false,
                };
                match self.gemini.place_order(&order).await {
                    Ok(report) => {
                        let exit_price = report.avg_execution_price.unwrap_or(exit_price_wanted);
                        let fee = self.fee_for(&p.gemini_symbol, params);
                        let fees = (p.entry_price + exit_price) * p.qty * fee;
                        self.store
                            .audit(
                                "exit_order_ack",
                                serde_json::json!({
                                    "position_id": p.id,
                                    "order_id": report.order_id,
                                    "status": report.status,
                                }),
                                ctx.now,
                            )
                            .await?;
                        self.store
                            .close_position(p, exit_price, fees, reason, ctx.now)
                            .await?;
                        self.pending_exits.lock().remove(&p.id);
                        info!(position_id = p.id, reason = reason.as_str(), "live position closed");
                    }
                    Err(e) => {
                        // Not closed. Park in exiting and retry next tick.
                        warn!(position_id = p.id, error = %e, "live exit failed, will retry");
                        self.pending_exits.lock().insert(p.id, reason);
                        if p.state != PositionState::Exiting {
                            self.store
                                .set_position_state(p.id, PositionState::Exiting)
                                .await?;
                        }
                        self.store
                            .audit(
                                "exit_retry",
                                serde_json::json!({
                                    "position_id": p.id,
                                    "reason": reason.as_str(),
                                    "error": e.to_string(),
                                }),
                                ctx.now,
                            )
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Close every open position at the best available price and stop.
    pub async fn emergency_close_all(&self, params: &Params, ctx: &TickContext) -> Result<usize> {
        let positions = self.store.open_positions().await?;
        let mut closed = 0usize;
        for p in &positions {
            let quote = self
                .gemini
                .cached_quote(&p.gemini_symbol)
                .unwrap_or(Quote {
                    bid: p.entry_price,
                    ask: p.entry_price,
                    last: p.entry_price,
                    bid_depth: None,
                    ask_depth: None,
                    ts: ctx.now,
                });
            self.try_close(p, &quote, ExitReason::Emergency, params, ctx)
                .await?;
            closed += 1;
        }
        Ok(closed)
    }

    /// Operator-requested close of one position.
    pub async fn close_by_id(
        &self,
        position_id: i64,
        params: &Params,
        ctx: &TickContext,
    ) -> Result<bool> {
        let Some(p) = self.store.position(position_id).await? else {
            return Ok(false);
        };
        if p.state == PositionState::Closed {
            return Ok(false);
        }
        let quote = self.gemini.cached_quote(&p.gemini_symbol).unwrap_or(Quote {
            bid: p.entry_price,
            ask: p.entry_price,
            last: p.entry_price,
            bid_depth: None,
            ask_depth: None,
            ts: ctx.now,
        });
        self.try_close(&p, &quote, ExitReason::Manual, params, ctx)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, MatchedMarket, QuoteSnapshot, StrategyTag};
    use crate::models::now_ts;

    fn test_engine(mode: Mode) -> (tempfile::TempDir, TradingEngine, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let gemini = Arc::new(
            GeminiClient::new(
                "https://api.gemini.com".to_string(),
                None,
                None,
                dir.path().join("nonce").to_str().unwrap(),
            )
            .unwrap(),
        );
        let engine = TradingEngine::new(
            store.clone(),
            gemini,
            mode,
            "GEMI-".to_string(),
            HashMap::new(),
            7,
        );
        (dir, engine, store)
    }

    async fn seed_market(store: &Store, symbol: &str) -> MatchedMarket {
        let m = MatchedMarket {
            id: format!("mm-{symbol}"),
            gemini_symbol: symbol.to_string(),
            polymarket_id: Some("pm-1".to_string()),
            kalshi_id: None,
            category: Category::Crypto,
            title: symbol.to_string(),
            confidence: 0.9,
            structural: None,
            first_seen_ts: now_ts(),
            last_seen_ts: now_ts(),
        };
        store.seed(500.0, now_ts()).await.unwrap();
        store.upsert_market(&m).await.unwrap();
        m
    }

    fn yes_signal(m: &MatchedMarket, net_edge: f64) -> Signal {
        Signal {
            matched_id: m.id.clone(),
            gemini_symbol: m.gemini_symbol.clone(),
            category: Category::Crypto,
            direction: Direction::Yes,
            score: 70.0,
            net_edge,
            confidence: 0.8,
            kelly: Some(0.17),
            strategy: StrategyTag::FairValue,
            quotes: QuoteSnapshot {
                reference: Some(0.66),
                ..Default::default()
            },
            breakdown: None,
        }
    }

    fn quote(bid: f64, ask: f64, now: i64) -> Quote {
        Quote {
            bid,
            ask,
            last: (bid + ask) / 2.0,
            bid_depth: Some(400.0),
            ask_depth: Some(400.0),
            ts: now,
        }
    }

    fn tick(now: i64) -> TickContext {
        TickContext {
            running: true,
            circuit_open: false,
            kill_switch: false,
            now,
        }
    }

    #[tokio::test]
    async fn paper_entry_fills_at_mid_plus_increment() {
        let (_d, engine, store) = test_engine(Mode::Paper);
        let m = seed_market(&store, "GEMI-BTC2602041700-HI67500").await;
        let now = now_ts();
        let params = Params::defaults();

        let mut lookup = HashMap::new();
        lookup.insert(
            m.gemini_symbol.clone(),
            EntryMarketState {
                quote: Some(quote(0.57, 0.61, now)),
                book: Some(BookTop {
                    bid: Some((0.57, 400.0)),
                    ask: Some((0.61, 400.0)),
                }),
                spot: Some(67_800.0),
                strike: Some(67_500.0),
                expiry_ts: Some(now + 4 * 3600),
            },
        );

        engine
            .tick_entries(&[yes_signal(&m, 0.12)], &lookup, &params, &tick(now))
            .await
            .unwrap();

        let open = store.open_positions().await.unwrap();
        assert_eq!(open.len(), 1);
        let p = &open[0];
        assert_eq!(p.mode, TradeMode::Paper);
        // Mid 0.59 + maker increment, plus sub-0.0005 jitter: never the ask.
        assert!(p.entry_price >= 0.591 && p.entry_price < 0.5915, "entry {}", p.entry_price);
        assert!(p.tp >= p.entry_price + 0.015 - 1e-9);
        assert!((p.sl - (p.entry_price - 0.05)).abs() < 1e-9);
        assert_eq!(engine.entries_opened(), 1);
    }

    #[tokio::test]
    async fn paper_fill_is_deterministic_per_seed() {
        let prices: Vec<f64> = {
            let mut out = Vec::new();
            for _ in 0..2 {
                let (_d, engine, store) = test_engine(Mode::Paper);
                let m = seed_market(&store, "GEMI-BTC2602041700-HI67500").await;
                let now = now_ts();
                let params = Params::defaults();
                let mut lookup = HashMap::new();
                lookup.insert(
                    m.gemini_symbol.clone(),
                    EntryMarketState {
                        quote: Some(quote(0.57, 0.61, now)),
                        book: None,
                        spot: None,
                        strike: None,
                        expiry_ts: None,
                    },
                );
                engine
                    .tick_entries(&[yes_signal(&m, 0.12)], &lookup, &params, &tick(now))
                    .await
                    .unwrap();
                out.push(store.open_positions().await.unwrap()[0].entry_price);
            }
            out
        };
        assert_eq!(prices[0], prices[1]);
    }

    #[tokio::test]
    async fn guard_reject_is_audited() {
        let (_d, engine, store) = test_engine(Mode::Paper);
        let m = seed_market(&store, "GEMI-BTC2602041700-HI67500").await;
        let now = now_ts();
        let params = Params::defaults();

        let mut lookup = HashMap::new();
        lookup.insert(
            m.gemini_symbol.clone(),
            EntryMarketState {
                quote: Some(quote(0.57, 0.61, now)),
                book: None,
                spot: Some(72_000.0),
                strike: Some(60_000.0),
                expiry_ts: None,
            },
        );

        // NO against a deeply ITM contract.
        let mut s = yes_signal(&m, 0.20);
        s.direction = Direction::No;
        engine
            .tick_entries(&[s], &lookup, &params, &tick(now))
            .await
            .unwrap();

        assert!(store.open_positions().await.unwrap().is_empty());
        let audits = store.audit_recent(5).await.unwrap();
        assert!(audits
            .iter()
            .any(|a| a.kind == "guard_reject" && a.payload["reason"] == "deep_itm"));
    }

    #[tokio::test]
    async fn live_only_strategy_on_paper_instrument_rejected_not_routed() {
        // Live-capable process, but the instrument lacks the live prefix: a
        // synthetic arb must be rejected and audited, never simulated.
        let (_d, engine, store) = test_engine(Mode::Live);
        let m = seed_market(&store, "XEXCH-ARB-TEST").await;
        let now = now_ts();
        let params = Params::defaults();

        let mut s = yes_signal(&m, 0.12);
        s.strategy = StrategyTag::SyntheticArb;

        let mut lookup = HashMap::new();
        lookup.insert(
            m.gemini_symbol.clone(),
            EntryMarketState {
                quote: Some(quote(0.57, 0.61, now)),
                book: None,
                spot: None,
                strike: None,
                expiry_ts: None,
            },
        );
        engine
            .tick_entries(&[s], &lookup, &params, &tick(now))
            .await
            .unwrap();

        assert!(store.open_positions().await.unwrap().is_empty());
        let audits = store.audit_recent(5).await.unwrap();
        assert!(audits
            .iter()
            .any(|a| a.kind == "guard_reject" && a.payload["reason"] == "not_live_instrument"));
    }

    #[tokio::test]
    async fn take_profit_closes_and_updates_wallet() {
        let (_d, engine, store) = test_engine(Mode::Paper);
        let m = seed_market(&store, "GEMI-BTC2602041700-HI67500").await;
        let now = now_ts();
        let params = Params::defaults();

        let mut lookup = HashMap::new();
        lookup.insert(
            m.gemini_symbol.clone(),
            EntryMarketState {
                quote: Some(quote(0.57, 0.61, now)),
                book: None,
                spot: None,
                strike: None,
                expiry_ts: None,
            },
        );
        engine
            .tick_entries(&[yes_signal(&m, 0.12)], &lookup, &params, &tick(now))
            .await
            .unwrap();

        // Price rallies through the target.
        let mut quotes = HashMap::new();
        quotes.insert(m.gemini_symbol.clone(), quote(0.68, 0.70, now + 10));
        engine
            .monitor(&quotes, &params, &tick(now + 10))
            .await
            .unwrap();

        assert!(store.open_positions().await.unwrap().is_empty());
        let trades = store.recent_trades(5).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].exit_reason, ExitReason::TakeProfit);
        assert!(trades[0].net_pnl > 0.0);
        let w = store.wallet().await.unwrap();
        assert!((w.balance - (w.initial + trades[0].net_pnl)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn per_market_fee_override_applies_to_paper_fills() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let gemini = Arc::new(
            GeminiClient::new(
                "https://api.gemini.com".to_string(),
                None,
                None,
                dir.path().join("nonce").to_str().unwrap(),
            )
            .unwrap(),
        );
        let mut overrides = HashMap::new();
        overrides.insert("GEMI-BTC2602041700-HI67500".to_string(), 0.01);
        let engine = TradingEngine::new(
            store.clone(),
            gemini,
            Mode::Paper,
            "GEMI-".to_string(),
            overrides,
            7,
        );

        let m = seed_market(&store, "GEMI-BTC2602041700-HI67500").await;
        let now = now_ts();
        let params = Params::defaults();

        let mut lookup = HashMap::new();
        lookup.insert(
            m.gemini_symbol.clone(),
            EntryMarketState {
                quote: Some(quote(0.57, 0.61, now)),
                book: None,
                spot: None,
                strike: None,
                expiry_ts: None,
            },
        );
        engine
            .tick_entries(&[yes_signal(&m, 0.12)], &lookup, &params, &tick(now))
            .await
            .unwrap();

        let mut quotes = HashMap::new();
        quotes.insert(m.gemini_symbol.clone(), quote(0.68, 0.70, now + 10));
        engine
            .monitor(&quotes, &params, &tick(now + 10))
            .await
            .unwrap();

        let t = &store.recent_trades(5).await.unwrap()[0];
        // Overridden 1% per side, not the 0.0001 default.
        let expected = (t.entry_price + t.exit_price) * t.qty * 0.01;
        assert!((t.fees - expected).abs() < 1e-9, "fees {}", t.fees);
    }

    #[tokio::test]
    async fn stop_loss_trails_the_mid() {
        let (_d, engine, store) = test_engine(Mode::Paper);
        let m = seed_market(&store, "GEMI-BTC2602041700-HI67500").await;
        let now = now_ts();
        let params = Params::defaults();

        let mut lookup = HashMap::new();
        lookup.insert(
            m.gemini_symbol.clone(),
            EntryMarketState {
                quote: Some(quote(0.57, 0.61, now)),
                book: None,
                spot: None,
                strike: None,
                expiry_ts: None,
            },
        );
        engine
            .tick_entries(&[yes_signal(&m, 0.12)], &lookup, &params, &tick(now))
            .await
            .unwrap();
        let sl0 = store.open_positions().await.unwrap()[0].sl;

        // Rally below TP: stop ratchets up behind the mid.
        let mut quotes = HashMap::new();
        quotes.insert(m.gemini_symbol.clone(), quote(0.62, 0.64, now + 10));
        engine
            .monitor(&quotes, &params, &tick(now + 10))
            .await
            .unwrap();
        let p = &store.open_positions().await.unwrap()[0];
        assert!(p.sl > sl0, "sl {} vs {}", p.sl, sl0);
        assert!((p.sl - (0.63 - 0.05)).abs() < 1e-9);
        assert!(p.high_water >= 0.63 - 1e-9);
    }

    #[tokio::test]
    async fn live_position_never_paper_closed() {
        let (_d, engine, store) = test_engine(Mode::Paper);
        let m = seed_market(&store, "GEMI-BTC2602041700-HI67500").await;
        let now = now_ts();
        let params = Params::defaults();

        // A live position found in the store (e.g. after a mode change and
        // restart) while the process is paper-only.
        let p = Position {
            id: 0,
            matched_id: m.id.clone(),
            gemini_symbol: m.gemini_symbol.clone(),
            direction: Direction::Yes,
            entry_price: 0.59,
            qty: 16.9,
            notional: 10.0,
            entry_ts: now,
            mode: TradeMode::Live,
            category: Category::Crypto,
            tp: 0.60,
            sl: 0.54,
            max_hold_ts: now + 3600,
            high_water: 0.59,
            low_water: 0.59,
            state: PositionState::Open,
        };
        store.insert_position(&p).await.unwrap();

        // TP condition fires, but the paper process must not settle it.
        let mut quotes = HashMap::new();
        quotes.insert(m.gemini_symbol.clone(), quote(0.68, 0.70, now + 10));
        engine
            .monitor(&quotes, &params, &tick(now + 10))
            .await
            .unwrap();

        assert_eq!(store.open_positions().await.unwrap().len(), 1);
        assert!(store.recent_trades(5).await.unwrap().is_empty());
        let w = store.wallet().await.unwrap();
        assert_eq!(w.balance, w.initial);
        assert_eq!(store.audit_count("invariant_violation").await.unwrap(), 1);
    }
}
