//! Scheduler.
//!
//! Drives the periodic loops: the fast loop (price fetch, signal, trade),
//! the match loop, the spot and oracle polls, the learning tick, and the
//! hourly reconciliation. Owns the circuit breaker and the drawdown
//! kill-switch. Shutdown is cooperative: every loop finishes its current
//! iteration, live-order confirmations get a bounded drain, then the process
//! exits.

use anyhow::Result;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::alerts::AlertSender;
use crate::config::Config;
use crate::matcher::{self, ManualOverride, MatchInputs};
use crate::models::{now_ts, Category, MatchedMarket, PriceSource, Quote, Venue};
use crate::oracles::OracleHub;
use crate::pricing::ensemble::{evaluate_full, FairValueInputs};
use crate::pricing::reference::{
    build_reference, liquid_bracket_count, synthetic_probability, BracketQuote,
};
use crate::signals::detector::{detect_all, MarketSnapshot, SyntheticArbCandidate};
use crate::spot::SpotFeed;
use crate::store::params::Params;
use crate::store::Store;
use crate::trading::{EntryMarketState, TickContext, TradingEngine};
use crate::venues::gemini::GeminiClient;
use crate::venues::kalshi::KalshiClient;
use crate::venues::polymarket::PolymarketClient;
use crate::venues::{BookTop, VenueClient};

pub const FAST_LOOP_SECS: u64 = 2;
pub const MATCH_LOOP_SECS: u64 = 300;
pub const LEARNING_LOOP_SECS: u64 = 30;
pub const RECONCILE_LOOP_SECS: u64 = 3600;

/// Per-venue-call timeout inside one fast-loop iteration.
const VENUE_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Quote rows older than this are purged from the ring.
const QUOTE_RETENTION_SECS: i64 = 3600;

/// Breaker: this many consecutive venue failures open it...
const BREAKER_THRESHOLD: u32 = 5;
/// ...for this long. Monitoring continues while open.
const BREAKER_COOLDOWN_SECS: i64 = 30;

/// Drain window for in-flight live-order confirmations at shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

pub struct CircuitBreaker {
    inner: parking_lot::Mutex<BreakerInner>,
}

struct BreakerInner {
    consecutive_failures: u32,
    open_until: Option<i64>,
    trips: u64,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            inner: parking_lot::Mutex::new(BreakerInner {
                consecutive_failures: 0,
                open_until: None,
                trips: 0,
            }),
        }
    }

    pub fn record_success(&self) {
        self.inner.lock().consecutive_failures = 0;
    }

    /// Returns true when this failure tripped the breaker open.
    pub fn record_failure(&self, now: i64) -> bool {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= BREAKER_THRESHOLD && inner.open_until.is_none() {
            inner.open_until = Some(now + BREAKER_COOLDOWN_SECS);
            inner.trips += 1;
            return true;
        }
        false
    }

    pub fn is_open(&self, now: i64) -> bool {
        let mut inner = self.inner.lock();
        match inner.open_until {
            Some(until) if now < until => true,
            Some(_) => {
                // Cooldown elapsed: close and start counting fresh.
                inner.open_until = None;
                inner.consecutive_failures = 0;
                false
            }
            None => false,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn trips(&self) -> u64 {
        self.inner.lock().trips
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared bot state consulted by the loops and the operator API.
pub struct BotState {
    pub running: AtomicBool,
    pub kill_switch: AtomicBool,
    pub breaker: CircuitBreaker,
    pub params: ArcSwap<Params>,
    /// Last successful fetch per venue, unix seconds.
    pub venue_freshness: parking_lot::Mutex<HashMap<Venue, i64>>,
    /// Lifetime error tally per failure kind, for the health surface.
    pub error_counts: parking_lot::Mutex<HashMap<&'static str, u64>>,
    pub overrides: parking_lot::Mutex<Vec<ManualOverride>>,
    pub rematch_requested: AtomicBool,
}

impl BotState {
    pub fn new(params: Params) -> Self {
        Self {
            running: AtomicBool::new(true),
            kill_switch: AtomicBool::new(false),
            breaker: CircuitBreaker::new(),
            params: ArcSwap::from_pointee(params),
            venue_freshness: parking_lot::Mutex::new(HashMap::new()),
            error_counts: parking_lot::Mutex::new(HashMap::new()),
            overrides: parking_lot::Mutex::new(Vec::new()),
            rematch_requested: AtomicBool::new(false),
        }
    }
}

pub struct Scheduler {
    pub cfg: Config,
    pub store: Store,
    pub gemini: Arc<GeminiClient>,
    pub polymarket: Arc<PolymarketClient>,
    pub kalshi: Arc<KalshiClient>,
    pub spot: Arc<SpotFeed>,
    pub oracles: Arc<OracleHub>,
    pub engine: Arc<TradingEngine>,
    pub state: Arc<BotState>,
    pub alerts: Arc<AlertSender>,
}

impl Scheduler {
    /// Spawn every loop; resolves when shutdown is signalled and the loops
    /// have drained.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::new();

        handles.push(tokio::spawn(spawn_loop(
            self.clone(),
            shutdown.clone(),
            Duration::from_secs(FAST_LOOP_SECS),
            "fast",
            |s| Box::pin(async move { s.fast_cycle().await }),
        )));
        handles.push(tokio::spawn(spawn_loop(
            self.clone(),
            shutdown.clone(),
            Duration::from_secs(MATCH_LOOP_SECS),
            "match",
            |s| Box::pin(async move { s.match_cycle().await }),
        )));
        handles.push(tokio::spawn(spawn_loop(
            self.clone(),
            shutdown.clone(),
            Duration::from_secs(crate::spot::SPOT_POLL_SECS),
            "spot",
            |s| {
                Box::pin(async move {
                    s.spot.poll_once().await;
                    Ok(())
                })
            },
        )));
        if self.oracles.enabled() {
            handles.push(tokio::spawn(spawn_loop(
                self.clone(),
                shutdown.clone(),
                Duration::from_secs(crate::oracles::ORACLE_POLL_SECS),
                "oracles",
                |s| {
                    Box::pin(async move {
                        s.oracles.poll_once().await;
                        Ok(())
                    })
                },
            )));
        }
        handles.push(tokio::spawn(learning_loop(self.clone(), shutdown.clone())));
        handles.push(tokio::spawn(spawn_loop(
            self.clone(),
            shutdown.clone(),
            Duration::from_secs(RECONCILE_LOOP_SECS),
            "reconcile",
            |s| {
                Box::pin(async move {
                    crate::trading::reconcile::reconcile(
                        &s.store,
                        &s.gemini,
                        s.cfg.mode.executes_live(),
                        now_ts(),
                    )
                    .await
                    .map(|_| ())
                })
            },
        )));

        for handle in handles {
            let _ = handle.await;
        }

        // Bounded drain for any live-order confirmations still in flight.
        if self.cfg.mode.executes_live() {
            let _ = timeout(SHUTDOWN_DRAIN, self.drain_exiting()).await;
        }
        info!("scheduler stopped");
    }

    async fn drain_exiting(&self) {
        let params = self.state.params.load_full();
        let ctx = TickContext {
            running: false,
            circuit_open: false,
            kill_switch: self.state.kill_switch.load(Ordering::Relaxed),
            now: now_ts(),
        };
        if let Err(e) = self.engine.monitor(&HashMap::new(), &params, &ctx).await {
            warn!(error = %e, "drain pass failed");
        }
    }

    // ---- match cycle ----

    pub async fn match_cycle(&self) -> Result<()> {
        let now = now_ts();
        let categories = Category::ALL;

        let (gemini_markets, polymarket_markets, kalshi_markets) = tokio::join!(
            self.gemini.list_markets(&categories),
            self.polymarket.list_markets(&categories),
            self.kalshi.list_markets(&categories),
        );

        let gemini_markets = self.unwrap_or_empty(Venue::Gemini, gemini_markets, now);
        let polymarket_markets = self.unwrap_or_empty(Venue::Polymarket, polymarket_markets, now);
        let kalshi_markets = self.unwrap_or_empty(Venue::Kalshi, kalshi_markets, now);

        if gemini_markets.is_empty() {
            warn!("no gemini markets this cycle, skipping match");
            return Ok(());
        }

        let existing = self.store.list_markets().await?;
        let overrides = self.state.overrides.lock().clone();
        let outcome = matcher::run_cycle(MatchInputs {
            gemini: &gemini_markets,
            polymarket: &polymarket_markets,
            kalshi: &kalshi_markets,
            existing: &existing,
            overrides: &overrides,
            now,
        });

        let mut bracket_tickers: Vec<String> = Vec::new();
        for m in &outcome.markets {
            self.store.upsert_market(m).await?;
            if let Some(s) = &m.structural {
                bracket_tickers.extend(s.brackets.iter().cloned());
            }
        }
        self.kalshi.subscribe_brackets(&bracket_tickers);

        // Rows unseen for more than one full missed cycle are collected.
        let gc_cutoff = now - 2 * MATCH_LOOP_SECS as i64;
        let collected = self.store.gc_markets(gc_cutoff).await?;
        if collected > 0 {
            debug!(collected, "stale matched markets collected");
        }

        // Unknown-symbol quarantine lasts exactly one match cycle.
        self.gemini.clear_unavailable();
        Ok(())
    }

    fn unwrap_or_empty<T>(&self, venue: Venue, result: Result<Vec<T>>, now: i64) -> Vec<T> {
        match result {
            Ok(v) => {
                self.state.venue_freshness.lock().insert(venue, now);
                self.state.breaker.record_success();
                v
            }
            Err(e) => {
                warn!(venue = venue.as_str(), error = %e, "venue listing failed");
                self.count_error(crate::venues::fail_kind(&e));
                self.note_venue_failure(now);
                Vec::new()
            }
        }
    }

    fn count_error(&self, kind: crate::venues::FailKind) {
        *self.state.error_counts.lock().entry(kind.as_str()).or_insert(0) += 1;
    }

    fn note_venue_failure(&self, now: i64) {
        if self.state.breaker.record_failure(now) {
            error!("circuit breaker open: too many consecutive venue failures");
            let store = self.store.clone();
            let alerts = self.alerts.clone();
            tokio::spawn(async move {
                let _ = store
                    .audit(
                        "circuit_breaker_open",
                        serde_json::json!({ "cooldown_secs": BREAKER_COOLDOWN_SECS }),
                        now,
                    )
                    .await;
                alerts
                    .send("circuit_breaker_open", "venue failures tripped the breaker")
                    .await;
            });
        }
    }

    // ---- fast cycle ----

    pub async fn fast_cycle(&self) -> Result<()> {
        let now = now_ts();

        // Operator rematch requests preempt the five-minute match timer.
        if self.state.rematch_requested.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.match_cycle().await {
                warn!(error = %e, "operator-requested rematch failed");
            }
        }

        // Parameter snapshot at the top of the iteration: a learning write
        // mid-iteration cannot produce inconsistent component weights.
        let params = Arc::new(self.store.params_snapshot().await?);
        self.state.params.store(params.clone());

        let markets = self.store.list_markets().await?;
        if markets.is_empty() {
            return Ok(());
        }

        let gemini_ids: Vec<String> = markets.iter().map(|m| m.gemini_symbol.clone()).collect();
        let polymarket_ids: Vec<String> = markets
            .iter()
            .filter_map(|m| m.polymarket_id.clone())
            .collect();
        let kalshi_ids: Vec<String> = markets
            .iter()
            .flat_map(|m| match &m.structural {
                Some(s) => s.brackets.clone(),
                None => m.kalshi_id.clone().into_iter().collect(),
            })
            .collect();

        // Fan-in: all three venues in parallel, each under its own timeout.
        // A missing venue degrades to an absent source for this cycle.
        let (g, p, k) = tokio::join!(
            timeout(VENUE_FETCH_TIMEOUT, self.gemini.batch_quotes(&gemini_ids)),
            timeout(VENUE_FETCH_TIMEOUT, self.polymarket.batch_quotes(&polymarket_ids)),
            timeout(VENUE_FETCH_TIMEOUT, self.kalshi.batch_quotes(&kalshi_ids)),
        );
        let gemini_quotes = self.settle_fetch(Venue::Gemini, g, now);
        let polymarket_quotes = self.settle_fetch(Venue::Polymarket, p, now);
        let kalshi_quotes = self.settle_fetch(Venue::Kalshi, k, now);

        // Kill-switch: drawdown beyond the configured fraction halts entries
        // (monitoring continues below).
        let wallet = self.store.roll_daily(now).await?;
        if wallet.drawdown_pct() > params.drawdown_kill_pct()
            && !self.state.kill_switch.swap(true, Ordering::SeqCst)
        {
            error!(
                drawdown = wallet.drawdown_pct(),
                "drawdown kill-switch tripped"
            );
            self.store
                .audit(
                    "kill_switch",
                    serde_json::json!({ "drawdown_pct": wallet.drawdown_pct() }),
                    now,
                )
                .await?;
            self.alerts
                .send("kill_switch", "drawdown kill-switch tripped; entries halted")
                .await;
        }

        // Persist this cycle's quotes, then build snapshots.
        let mut quote_rows: Vec<(String, Venue, Quote)> = Vec::new();
        let mut snapshots: Vec<MarketSnapshot> = Vec::with_capacity(markets.len());
        let mut lookup: HashMap<String, EntryMarketState> = HashMap::new();

        for market in &markets {
            let gemini_quote = gemini_quotes.get(&market.gemini_symbol).copied();
            let polymarket_quote = market
                .polymarket_id
                .as_ref()
                .and_then(|id| polymarket_quotes.get(id))
                .copied();

            if let Some(q) = gemini_quote {
                quote_rows.push((market.id.clone(), Venue::Gemini, q));
            }
            if let Some(q) = polymarket_quote {
                quote_rows.push((market.id.clone(), Venue::Polymarket, q));
            }

            let snapshot = self
                .build_snapshot(
                    market,
                    gemini_quote,
                    polymarket_quote,
                    &kalshi_quotes,
                    &params,
                    now,
                )
                .await?;

            if let Some(syn) = snapshot.kalshi_synthetic {
                quote_rows.push((
                    market.id.clone(),
                    Venue::Kalshi,
                    Quote {
                        bid: syn,
                        ask: syn,
                        last: syn,
                        bid_depth: None,
                        ask_depth: None,
                        ts: now,
                    },
                ));
            }

            lookup.insert(
                market.gemini_symbol.clone(),
                EntryMarketState {
                    quote: gemini_quote,
                    book: gemini_quote.map(book_from_quote),
                    spot: snapshot.spot,
                    strike: market.structural.as_ref().map(|s| s.strike),
                    expiry_ts: market.structural.as_ref().map(|s| s.expiry_ts),
                },
            );
            snapshots.push(snapshot);
        }
        self.store.insert_quotes(&quote_rows).await?;
        self.store.purge_quotes(now - QUOTE_RETENTION_SECS).await?;

        let arb_candidates = self.arb_candidates(&snapshots, &params);
        let live = self.cfg.mode.executes_live();
        let signals = detect_all(
            &snapshots,
            &arb_candidates,
            &params,
            live,
            &self.synth_arb_allowed(),
        );

        let ctx = TickContext {
            running: self.state.running.load(Ordering::Relaxed),
            circuit_open: self.state.breaker.is_open(now),
            kill_switch: self.state.kill_switch.load(Ordering::Relaxed),
            now,
        };

        self.engine.tick_entries(&signals, &lookup, &params, &ctx).await?;
        self.engine.monitor(&gemini_quotes, &params, &ctx).await?;
        Ok(())
    }

    fn settle_fetch(
        &self,
        venue: Venue,
        result: std::result::Result<Result<HashMap<String, Quote>>, tokio::time::error::Elapsed>,
        now: i64,
    ) -> HashMap<String, Quote> {
        match result {
            Ok(Ok(map)) => {
                self.state.venue_freshness.lock().insert(venue, now);
                self.state.breaker.record_success();
                map
            }
            Ok(Err(e)) => {
                warn!(venue = venue.as_str(), error = %e, "quote fetch failed");
                self.count_error(crate::venues::fail_kind(&e));
                self.note_venue_failure(now);
                HashMap::new()
            }
            Err(_) => {
                warn!(venue = venue.as_str(), "quote fetch timed out");
                self.count_error(crate::venues::FailKind::Transport);
                self.note_venue_failure(now);
                HashMap::new()
            }
        }
    }

    async fn build_snapshot(
        &self,
        market: &MatchedMarket,
        gemini_quote: Option<Quote>,
        polymarket_quote: Option<Quote>,
        kalshi_quotes: &HashMap<String, Quote>,
        params: &Params,
        now: i64,
    ) -> Result<MarketSnapshot> {
        // Kalshi synthetic from the bound brackets (crypto) or the single
        // fuzzy-matched market (everything else).
        let (kalshi_synthetic, kalshi_spread, liquid_brackets) = match &market.structural {
            Some(s) => {
                let brackets: Vec<BracketQuote> = s
                    .brackets
                    .iter()
                    .filter_map(|ticker| {
                        let q = kalshi_quotes.get(ticker)?;
                        Some(BracketQuote {
                            mid: q.mid(),
                            spread: q.spread(),
                            volume: self.kalshi.cached_volume(ticker).unwrap_or(0.0),
                        })
                    })
                    .collect();
                let syn = synthetic_probability(&brackets);
                let spread = brackets
                    .first()
                    .map(|b| b.spread)
                    .or_else(|| gemini_quote.map(|q| q.spread()));
                (syn, spread, liquid_bracket_count(&brackets))
            }
            None => {
                let q = market.kalshi_id.as_ref().and_then(|id| kalshi_quotes.get(id));
                (q.map(|q| q.mid()), q.map(|q| q.spread()), 0)
            }
        };

        let spot = market
            .structural
            .as_ref()
            .and_then(|s| self.spot.price_for_asset(&s.asset));

        // Fair value (crypto with live spot only), which also supplies the
        // reference for crypto markets.
        let (fair, reference) = match (&market.structural, spot, gemini_quote) {
            (Some(meta), Some(spot_price), Some(g)) => {
                let inputs = FairValueInputs {
                    meta,
                    spot: spot_price,
                    now,
                    synthetic: kalshi_synthetic,
                    liquid_brackets,
                    gemini: &g,
                    vol_source: self.cfg.vol_source,
                };
                match evaluate_full(&inputs, params) {
                    Some((fv, reference)) => (Some(fv), Some(reference)),
                    None => (None, None),
                }
            }
            _ => {
                // Non-crypto (or spot-suppressed): reference from the quote
                // sources plus any enabled oracles, consulted every cycle.
                let mut sources: Vec<(PriceSource, f64)> = Vec::new();
                if let Some(q) = polymarket_quote {
                    if !q.is_stale(now, params.quote_staleness_secs()) {
                        sources.push((PriceSource::Polymarket, q.mid()));
                    }
                }
                if let Some(p) = kalshi_synthetic {
                    sources.push((PriceSource::KalshiSynthetic, p));
                }
                for (name, prob) in self.oracles.lookup(&market.id, market.category) {
                    sources.push((PriceSource::Oracle(name), prob));
                }
                (None, build_reference(market.category, &sources, params))
            }
        };

        // Reference-venue mid history for the velocity component.
        let history_rows = self
            .store
            .recent_quotes(&market.id, Venue::Polymarket, 10)
            .await?;
        let mut ref_mid_history: Vec<f64> = history_rows.iter().rev().map(|q| q.mid()).collect();
        let history_span_secs = match (history_rows.last(), history_rows.first()) {
            (Some(oldest), Some(newest)) if newest.ts > oldest.ts => {
                (newest.ts - oldest.ts) as f64
            }
            _ => 0.0,
        };
        if ref_mid_history.is_empty() {
            if let Some(r) = &reference {
                ref_mid_history.push(r.prob);
            }
        }

        // Seconds since the Gemini `last` price moved.
        let gemini_history = self.store.recent_quotes(&market.id, Venue::Gemini, 10).await?;
        let secs_since_last_trade = seconds_since_last_trade(&gemini_history, now);

        let (category_wins, category_total) = self.store.category_stats(market.category).await?;

        Ok(MarketSnapshot {
            market: market.clone(),
            gemini: gemini_quote,
            polymarket: polymarket_quote,
            kalshi_synthetic,
            kalshi_spread,
            reference,
            fair,
            spot,
            ref_mid_history,
            history_span_secs,
            secs_since_last_trade,
            category_wins,
            category_total,
        })
    }

    /// Cross-platform arb candidates from the raw price gap. Off unless the
    /// allow-list names the category.
    fn arb_candidates(
        &self,
        snapshots: &[MarketSnapshot],
        params: &Params,
    ) -> Vec<SyntheticArbCandidate> {
        let allowed = self.synth_arb_allowed();
        if allowed.is_empty() {
            return Vec::new();
        }
        snapshots
            .iter()
            .filter(|s| allowed.contains(&s.market.category))
            .filter_map(|s| {
                let g = s.gemini.as_ref()?;
                let p = s.polymarket.as_ref()?;
                let gap = p.mid() - g.mid();
                let costs = g.spread() / 2.0 + p.spread() / 2.0 + 2.0 * params.fee_per_side();
                let net_edge = gap.abs() - costs;
                if net_edge <= 0.0 {
                    return None;
                }
                Some(SyntheticArbCandidate {
                    matched_id: s.market.id.clone(),
                    gemini_symbol: s.market.gemini_symbol.clone(),
                    category: s.market.category,
                    buy_gemini: gap > 0.0,
                    net_edge,
                    confidence: s.market.confidence,
                })
            })
            .collect()
    }

    fn synth_arb_allowed(&self) -> Vec<Category> {
        std::env::var("EDGEBOT_SYNTH_ARB_CATEGORIES")
            .ok()
            .map(|v| v.split(',').map(Category::parse).collect())
            .unwrap_or_default()
    }
}

fn book_from_quote(q: Quote) -> BookTop {
    BookTop {
        bid: (q.bid > 0.0).then_some((q.bid, q.bid_depth.unwrap_or(0.0))),
        ask: (q.ask > 0.0).then_some((q.ask, q.ask_depth.unwrap_or(0.0))),
    }
}

/// Seconds since the stored `last` price changed, newest-first input.
fn seconds_since_last_trade(history: &[Quote], now: i64) -> i64 {
    let Some(newest) = history.first() else {
        return 0;
    };
    let mut anchor = newest.ts;
    for q in history.iter().skip(1) {
        if (q.last - newest.last).abs() > f64::EPSILON {
            break;
        }
        anchor = q.ts;
    }
    (now - anchor).max(0)
}

/// Generic loop runner: tick, run, check shutdown, repeat.
async fn spawn_loop<F>(
    scheduler: Arc<Scheduler>,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
    name: &'static str,
    body: F,
) where
    F: Fn(
            Arc<Scheduler>,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<()>> + Send>,
        > + Send
        + Sync
        + 'static,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(loop_name = name, period_secs = period.as_secs(), "loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = body(scheduler.clone()).await {
                    warn!(loop_name = name, error = %e, "loop iteration failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(loop_name = name, "loop shutting down");
                    return;
                }
            }
        }
    }
}

async fn learning_loop(scheduler: Arc<Scheduler>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(LEARNING_LOOP_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycle = crate::trading::learning::LearningCycle::new();
    let live = scheduler.cfg.mode.executes_live();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let entries = scheduler.engine.entries_opened();
                if let Err(e) = cycle.tick(&scheduler.store, live, entries, now_ts()).await {
                    warn!(error = %e, "learning tick failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
