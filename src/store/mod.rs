//! Embedded relational store.
//!
//! One SQLite file holds matched markets, quote snapshots, positions, closed
//! trades, the wallet singleton, the clamped parameter table, and the
//! append-only audit log. All writes funnel through the single connection
//! mutex; readers tolerate brief staleness. Wallet updates ride in the same
//! transaction as the closed trade they belong to.

pub mod params;

use anyhow::{bail, Context, Result};
use rusqlite::{params as sql, Connection, OptionalExtension};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

use crate::models::{
    Category, ClosedTrade, Direction, ExitReason, MatchedMarket, Position, PositionState, Quote,
    StructuralMeta, TradeMode, Venue, Wallet,
};
use params::{clamp_param, Params, PARAM_DEFAULTS};

#[derive(Debug, Clone, serde::Serialize)]
pub struct ParamRow {
    pub key: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub updated_ts: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditRow {
    pub id: i64,
    pub ts: i64,
    pub kind: String,
    pub payload: serde_json::Value,
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open store")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "busy_timeout", 10_000).ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS matched_markets (
                id TEXT PRIMARY KEY,
                venue_a_id TEXT NOT NULL UNIQUE,
                venue_b_id TEXT,
                venue_c_id TEXT,
                category TEXT NOT NULL,
                title TEXT NOT NULL,
                confidence REAL NOT NULL,
                structural_meta TEXT,
                first_seen_ts INTEGER NOT NULL,
                last_seen_ts INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS market_quotes (
                matched_id TEXT NOT NULL REFERENCES matched_markets(id) ON DELETE CASCADE,
                venue TEXT NOT NULL,
                bid REAL NOT NULL,
                ask REAL NOT NULL,
                last REAL NOT NULL,
                bid_depth REAL,
                ask_depth REAL,
                ts INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_quotes_market_ts
                ON market_quotes(matched_id, venue, ts DESC);
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                matched_id TEXT NOT NULL REFERENCES matched_markets(id),
                venue_a_market TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price REAL NOT NULL,
                qty REAL NOT NULL,
                notional REAL NOT NULL,
                entry_ts INTEGER NOT NULL,
                mode TEXT NOT NULL,
                category TEXT NOT NULL,
                tp REAL NOT NULL,
                sl REAL NOT NULL,
                max_hold_ts INTEGER NOT NULL,
                hw REAL NOT NULL,
                lw REAL NOT NULL,
                state TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_one_open_per_market
                ON positions(venue_a_market)
                WHERE state IN ('nascent', 'open', 'exiting');
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id INTEGER NOT NULL REFERENCES positions(id),
                exit_price REAL NOT NULL,
                exit_ts INTEGER NOT NULL,
                gross_pnl REAL NOT NULL,
                net_pnl REAL NOT NULL,
                fees REAL NOT NULL,
                exit_reason TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS wallet (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                balance REAL NOT NULL,
                initial REAL NOT NULL,
                peak REAL NOT NULL,
                daily_pnl REAL NOT NULL,
                daily_start_ts INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS parameters (
                key TEXT PRIMARY KEY,
                value REAL NOT NULL,
                min REAL NOT NULL,
                max REAL NOT NULL,
                updated_ts INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                kind TEXT NOT NULL,
                payload_json TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Seed the wallet singleton and parameter defaults on first start.
    pub async fn seed(&self, initial_balance: f64, now: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO wallet (id, balance, initial, peak, daily_pnl, daily_start_ts)
             VALUES (1, ?1, ?1, ?1, 0.0, ?2)",
            sql![initial_balance, crate::models::utc_midnight(now)],
        )?;
        for (key, default, min, max) in PARAM_DEFAULTS {
            conn.execute(
                "INSERT OR IGNORE INTO parameters (key, value, min, max, updated_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                sql![key, default, min, max, now],
            )?;
        }
        Ok(())
    }

    // ---- matched markets ----

    pub async fn upsert_market(&self, m: &MatchedMarket) -> Result<()> {
        let structural = match &m.structural {
            Some(s) => Some(serde_json::to_string(s)?),
            None => None,
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO matched_markets
             (id, venue_a_id, venue_b_id, venue_c_id, category, title, confidence,
              structural_meta, first_seen_ts, last_seen_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(venue_a_id) DO UPDATE SET
                venue_b_id = excluded.venue_b_id,
                venue_c_id = excluded.venue_c_id,
                category = excluded.category,
                title = excluded.title,
                confidence = excluded.confidence,
                structural_meta = excluded.structural_meta,
                last_seen_ts = excluded.last_seen_ts",
            sql![
                &m.id,
                &m.gemini_symbol,
                m.polymarket_id.as_deref(),
                m.kalshi_id.as_deref(),
                m.category.as_str(),
                &m.title,
                m.confidence,
                structural.as_deref(),
                m.first_seen_ts,
                m.last_seen_ts,
            ],
        )?;
        Ok(())
    }

    pub async fn list_markets(&self) -> Result<Vec<MatchedMarket>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, venue_a_id, venue_b_id, venue_c_id, category, title, confidence,
                    structural_meta, first_seen_ts, last_seen_ts
             FROM matched_markets ORDER BY venue_a_id ASC",
        )?;
        let rows = stmt.query_map([], row_to_market)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub async fn market_by_id(&self, id: &str) -> Result<Option<MatchedMarket>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, venue_a_id, venue_b_id, venue_c_id, category, title, confidence,
                    structural_meta, first_seen_ts, last_seen_ts
             FROM matched_markets WHERE id = ?1",
        )?;
        Ok(stmt.query_row(sql![id], row_to_market).optional()?)
    }

    /// Delete rows unseen since `cutoff`. Markets with any position history are
    /// kept so trades remain resolvable.
    pub async fn gc_markets(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "DELETE FROM matched_markets
             WHERE last_seen_ts < ?1
               AND id NOT IN (SELECT DISTINCT matched_id FROM positions)",
            sql![cutoff],
        )?;
        Ok(n)
    }

    // ---- quotes ----

    pub async fn insert_quotes(&self, batch: &[(String, Venue, Quote)]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO market_quotes
                 (matched_id, venue, bid, ask, last, bid_depth, ask_depth, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (matched_id, venue, q) in batch {
                stmt.execute(sql![
                    matched_id,
                    venue.as_str(),
                    q.bid,
                    q.ask,
                    q.last,
                    q.bid_depth,
                    q.ask_depth,
                    q.ts,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Ring-buffer discipline: quotes older than the retention window are purged.
    pub async fn purge_quotes(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        Ok(conn.execute("DELETE FROM market_quotes WHERE ts < ?1", sql![cutoff])?)
    }

    /// Most recent quotes for one market on one venue, newest first.
    pub async fn recent_quotes(
        &self,
        matched_id: &str,
        venue: Venue,
        limit: usize,
    ) -> Result<Vec<Quote>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT bid, ask, last, bid_depth, ask_depth, ts
             FROM market_quotes WHERE matched_id = ?1 AND venue = ?2
             ORDER BY ts DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(sql![matched_id, venue.as_str(), limit as i64], |row| {
            Ok(Quote {
                bid: row.get(0)?,
                ask: row.get(1)?,
                last: row.get(2)?,
                bid_depth: row.get(3)?,
                ask_depth: row.get(4)?,
                ts: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ---- positions ----

    /// Insert a new position. The partial unique index rejects a second open
    /// position on the same venue-A market; that surfaces as an error here.
    pub async fn insert_position(&self, p: &Position) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO positions
             (matched_id, venue_a_market, direction, entry_price, qty, notional, entry_ts,
              mode, category, tp, sl, max_hold_ts, hw, lw, state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            sql![
                &p.matched_id,
                &p.gemini_symbol,
                p.direction.as_str(),
                p.entry_price,
                p.qty,
                p.notional,
                p.entry_ts,
                p.mode.as_str(),
                p.category.as_str(),
                p.tp,
                p.sl,
                p.max_hold_ts,
                p.high_water,
                p.low_water,
                p.state.as_str(),
            ],
        )
        .context("insert position (duplicate open position on market?)")?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn open_positions(&self) -> Result<Vec<Position>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, matched_id, venue_a_market, direction, entry_price, qty, notional,
                    entry_ts, mode, category, tp, sl, max_hold_ts, hw, lw, state
             FROM positions WHERE state IN ('nascent', 'open', 'exiting') ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], row_to_position)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub async fn position(&self, id: i64) -> Result<Option<Position>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, matched_id, venue_a_market, direction, entry_price, qty, notional,
                    entry_ts, mode, category, tp, sl, max_hold_ts, hw, lw, state
             FROM positions WHERE id = ?1",
        )?;
        Ok(stmt.query_row(sql![id], row_to_position).optional()?)
    }

    pub async fn set_position_state(&self, id: i64, state: PositionState) -> Result<()> {
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "UPDATE positions SET state = ?1 WHERE id = ?2",
            sql![state.as_str(), id],
        )?;
        if n == 0 {
            bail!("position {id} not found");
        }
        Ok(())
    }

    /// Monitor-pass bookkeeping: trailing stop and running extrema.
    pub async fn update_monitor(&self, id: i64, sl: f64, hw: f64, lw: f64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE positions SET sl = ?1, hw = ?2, lw = ?3 WHERE id = ?4",
            sql![sl, hw, lw, id],
        )?;
        Ok(())
    }

    pub async fn open_count(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM positions WHERE state IN ('nascent', 'open', 'exiting')",
            [],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    pub async fn open_count_by_category(&self, category: Category) -> Result<usize> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM positions
             WHERE state IN ('nascent', 'open', 'exiting') AND category = ?1",
            sql![category.as_str()],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    pub async fn has_open_for_market(&self, venue_a_market: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM positions
             WHERE state IN ('nascent', 'open', 'exiting') AND venue_a_market = ?1",
            sql![venue_a_market],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    // ---- closing + wallet ----

    /// Close a position: trade record, position state, wallet balance/peak/daily
    /// PnL, and the audit entry all commit in one transaction.
    pub async fn close_position(
        &self,
        p: &Position,
        exit_price: f64,
        fees: f64,
        reason: ExitReason,
        now: i64,
    ) -> Result<ClosedTrade> {
        if p.state == PositionState::Closed {
            bail!("position {} already closed", p.id);
        }

        let gross_pnl = (exit_price - p.entry_price) * p.qty;
        let net_pnl = gross_pnl - fees;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO trades (position_id, exit_price, exit_ts, gross_pnl, net_pnl, fees, exit_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            sql![p.id, exit_price, now, gross_pnl, net_pnl, fees, reason.as_str()],
        )?;
        let trade_id = tx.last_insert_rowid();

        let n = tx.execute(
            "UPDATE positions SET state = 'closed' WHERE id = ?1 AND state != 'closed'",
            sql![p.id],
        )?;
        if n == 0 {
            bail!("position {} already closed", p.id);
        }

        // Roll the daily accumulator at UTC midnight, then apply the PnL.
        let midnight = crate::models::utc_midnight(now);
        tx.execute(
            "UPDATE wallet SET daily_pnl = 0.0, daily_start_ts = ?1
             WHERE id = 1 AND daily_start_ts < ?1",
            sql![midnight],
        )?;
        tx.execute(
            "UPDATE wallet SET
                balance = balance + ?1,
                peak = MAX(peak, balance + ?1),
                daily_pnl = daily_pnl + ?1
             WHERE id = 1",
            sql![net_pnl],
        )?;

        let payload = serde_json::json!({
            "position_id": p.id,
            "market": p.gemini_symbol,
            "mode": p.mode.as_str(),
            "exit_reason": reason.as_str(),
            "exit_price": exit_price,
            "net_pnl": net_pnl,
        });
        tx.execute(
            "INSERT INTO audit (ts, kind, payload_json) VALUES (?1, ?2, ?3)",
            sql![now, "trade_closed", payload.to_string()],
        )?;

        tx.commit()?;

        Ok(ClosedTrade {
            id: trade_id,
            position_id: p.id,
            entry_price: p.entry_price,
            exit_price,
            qty: p.qty,
            exit_ts: now,
            gross_pnl,
            net_pnl,
            fees,
            exit_reason: reason,
            mode: p.mode,
            category: p.category,
            hold_secs: (now - p.entry_ts).max(0),
        })
    }

    pub async fn wallet(&self) -> Result<Wallet> {
        let conn = self.conn.lock().await;
        let w = conn.query_row(
            "SELECT balance, initial, peak, daily_pnl, daily_start_ts FROM wallet WHERE id = 1",
            [],
            |row| {
                Ok(Wallet {
                    balance: row.get(0)?,
                    initial: row.get(1)?,
                    peak: row.get(2)?,
                    daily_pnl: row.get(3)?,
                    daily_start_ts: row.get(4)?,
                })
            },
        )?;
        Ok(w)
    }

    /// Reset the daily accumulator when a UTC midnight has passed since the
    /// last anchor. Safe to call every cycle.
    pub async fn roll_daily(&self, now: i64) -> Result<Wallet> {
        {
            let conn = self.conn.lock().await;
            let midnight = crate::models::utc_midnight(now);
            conn.execute(
                "UPDATE wallet SET daily_pnl = 0.0, daily_start_ts = ?1
                 WHERE id = 1 AND daily_start_ts < ?1",
                sql![midnight],
            )?;
        }
        self.wallet().await
    }

    // ---- trades ----

    pub async fn recent_trades(&self, limit: usize) -> Result<Vec<ClosedTrade>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT t.id, t.position_id, p.entry_price, t.exit_price, p.qty, t.exit_ts,
                    t.gross_pnl, t.net_pnl, t.fees, t.exit_reason, p.mode, p.category, p.entry_ts
             FROM trades t JOIN positions p ON p.id = t.position_id
             ORDER BY t.id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(sql![limit as i64], |row| {
            let reason: String = row.get(9)?;
            let mode: String = row.get(10)?;
            let category: String = row.get(11)?;
            let entry_ts: i64 = row.get(12)?;
            let exit_ts: i64 = row.get(5)?;
            Ok(ClosedTrade {
                id: row.get(0)?,
                position_id: row.get(1)?,
                entry_price: row.get(2)?,
                exit_price: row.get(3)?,
                qty: row.get(4)?,
                exit_ts,
                gross_pnl: row.get(6)?,
                net_pnl: row.get(7)?,
                fees: row.get(8)?,
                exit_reason: ExitReason::parse(&reason),
                mode: TradeMode::parse(&mode),
                category: Category::parse(&category),
                hold_secs: (exit_ts - entry_ts).max(0),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// (wins, total) over closed trades in a category.
    pub async fn category_stats(&self, category: Category) -> Result<(u32, u32)> {
        let conn = self.conn.lock().await;
        let (wins, total): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(CASE WHEN t.net_pnl > 0 THEN 1 ELSE 0 END), 0), COUNT(*)
             FROM trades t JOIN positions p ON p.id = t.position_id
             WHERE p.category = ?1",
            sql![category.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok((wins as u32, total as u32))
    }

    // ---- parameters ----

    pub async fn params_snapshot(&self) -> Result<Params> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT key, value FROM parameters")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let mut map = HashMap::new();
        for r in rows {
            let (k, v) = r?;
            map.insert(k, v);
        }
        Ok(Params::from_map(map))
    }

    pub async fn param_rows(&self) -> Result<Vec<ParamRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached("SELECT key, value, min, max, updated_ts FROM parameters ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok(ParamRow {
                key: row.get(0)?,
                value: row.get(1)?,
                min: row.get(2)?,
                max: row.get(3)?,
                updated_ts: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Clamped write. Returns the value actually stored, and audits the change.
    pub async fn set_param(&self, key: &str, value: f64, now: i64) -> Result<f64> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let (min, max, old): (f64, f64, f64) = tx
            .query_row(
                "SELECT min, max, value FROM parameters WHERE key = ?1",
                sql![key],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?
            .with_context(|| format!("unknown parameter '{key}'"))?;

        let clamped = clamp_param(key, value, min, max);
        tx.execute(
            "UPDATE parameters SET value = ?1, updated_ts = ?2 WHERE key = ?3",
            sql![clamped, now, key],
        )?;

        let payload = serde_json::json!({
            "key": key,
            "old": old,
            "requested": value,
            "applied": clamped,
        });
        tx.execute(
            "INSERT INTO audit (ts, kind, payload_json) VALUES (?1, ?2, ?3)",
            sql![now, "param_change", payload.to_string()],
        )?;

        tx.commit()?;
        Ok(clamped)
    }

    // ---- audit ----

    pub async fn audit(&self, kind: &str, payload: serde_json::Value, now: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO audit (ts, kind, payload_json) VALUES (?1, ?2, ?3)",
            sql![now, kind, payload.to_string()],
        )?;
        Ok(())
    }

    pub async fn audit_recent(&self, limit: usize) -> Result<Vec<AuditRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, ts, kind, payload_json FROM audit ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(sql![limit as i64], |row| {
            let payload: String = row.get(3)?;
            Ok(AuditRow {
                id: row.get(0)?,
                ts: row.get(1)?,
                kind: row.get(2)?,
                payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub async fn audit_count(&self, kind: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audit WHERE kind = ?1",
            sql![kind],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }
}

fn row_to_market(row: &rusqlite::Row<'_>) -> rusqlite::Result<MatchedMarket> {
    let category: String = row.get(4)?;
    let structural: Option<String> = row.get(7)?;
    Ok(MatchedMarket {
        id: row.get(0)?,
        gemini_symbol: row.get(1)?,
        polymarket_id: row.get(2)?,
        kalshi_id: row.get(3)?,
        category: Category::parse(&category),
        title: row.get(5)?,
        confidence: row.get(6)?,
        structural: structural
            .and_then(|s| serde_json::from_str::<StructuralMeta>(&s).ok()),
        first_seen_ts: row.get(8)?,
        last_seen_ts: row.get(9)?,
    })
}

fn row_to_position(row: &rusqlite::Row<'_>) -> rusqlite::Result<Position> {
    let direction: String = row.get(3)?;
    let mode: String = row.get(8)?;
    let category: String = row.get(9)?;
    let state: String = row.get(15)?;
    Ok(Position {
        id: row.get(0)?,
        matched_id: row.get(1)?,
        gemini_symbol: row.get(2)?,
        direction: if direction == "NO" {
            Direction::No
        } else {
            Direction::Yes
        },
        entry_price: row.get(4)?,
        qty: row.get(5)?,
        notional: row.get(6)?,
        entry_ts: row.get(7)?,
        mode: TradeMode::parse(&mode),
        category: Category::parse(&category),
        tp: row.get(10)?,
        sl: row.get(11)?,
        max_hold_ts: row.get(12)?,
        high_water: row.get(13)?,
        low_water: row.get(14)?,
        state: PositionState::parse(&state),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_ts, Payoff};

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(path.to_str().unwrap()).unwrap();
        (dir, store)
    }

    fn sample_market(symbol: &str) -> MatchedMarket {
        MatchedMarket {
            id: format!("mm-{symbol}"),
            gemini_symbol: symbol.to_string(),
            polymarket_id: Some("pm-1".to_string()),
            kalshi_id: Some("KXBTCD-26FEB0417".to_string()),
            category: Category::Crypto,
            title: "BTC above 67500 at 17:00".to_string(),
            confidence: 0.95,
            structural: Some(StructuralMeta {
                asset: "BTC".to_string(),
                strike: 67_500.0,
                expiry_ts: now_ts() + 4 * 3600,
                payoff: Payoff::Above,
                brackets: vec!["KXBTCD-26FEB0417-B67500".to_string()],
            }),
            first_seen_ts: now_ts(),
            last_seen_ts: now_ts(),
        }
    }

    fn sample_position(store_market: &MatchedMarket) -> Position {
        Position {
            id: 0,
            matched_id: store_market.id.clone(),
            gemini_symbol: store_market.gemini_symbol.clone(),
            direction: Direction::Yes,
            entry_price: 0.59,
            qty: 16.9,
            notional: 10.0,
            entry_ts: now_ts(),
            mode: TradeMode::Paper,
            category: Category::Crypto,
            tp: 0.65,
            sl: 0.54,
            max_hold_ts: now_ts() + 3600,
            high_water: 0.59,
            low_water: 0.59,
            state: PositionState::Open,
        }
    }

    #[tokio::test]
    async fn market_roundtrip_and_gc() {
        let (_dir, store) = test_store();
        let m = sample_market("GEMI-BTC2602041700-HI67500");
        store.upsert_market(&m).await.unwrap();

        let listed = store.list_markets().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].gemini_symbol, m.gemini_symbol);
        assert_eq!(listed[0].structural, m.structural);

        // Unseen rows without position history are collected.
        let n = store.gc_markets(m.last_seen_ts + 1).await.unwrap();
        assert_eq!(n, 1);
        assert!(store.list_markets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn gc_keeps_markets_with_position_history() {
        let (_dir, store) = test_store();
        let m = sample_market("GEMI-BTC2602041700-HI67500");
        store.upsert_market(&m).await.unwrap();
        store.insert_position(&sample_position(&m)).await.unwrap();

        let n = store.gc_markets(m.last_seen_ts + 1).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(store.list_markets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_open_position_rejected() {
        let (_dir, store) = test_store();
        let m = sample_market("GEMI-BTC2602041700-HI67500");
        store.upsert_market(&m).await.unwrap();

        let p = sample_position(&m);
        store.insert_position(&p).await.unwrap();
        assert!(store.insert_position(&p).await.is_err());
        assert!(store
            .has_open_for_market(&m.gemini_symbol)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn close_updates_wallet_atomically() {
        let (_dir, store) = test_store();
        let now = now_ts();
        store.seed(500.0, now).await.unwrap();
        let m = sample_market("GEMI-BTC2602041700-HI67500");
        store.upsert_market(&m).await.unwrap();

        let mut p = sample_position(&m);
        p.id = store.insert_position(&p).await.unwrap();

        let trade = store
            .close_position(&p, 0.65, 0.02, ExitReason::TakeProfit, now)
            .await
            .unwrap();
        let expected_net = (0.65 - 0.59) * 16.9 - 0.02;
        assert!((trade.net_pnl - expected_net).abs() < 1e-9);

        let w = store.wallet().await.unwrap();
        assert!((w.balance - (500.0 + expected_net)).abs() < 1e-9);
        assert!(w.peak >= w.balance);
        assert!((w.daily_pnl - expected_net).abs() < 1e-9);

        // Balance invariant: initial + sum(net_pnl).
        let trades = store.recent_trades(10).await.unwrap();
        let total: f64 = trades.iter().map(|t| t.net_pnl).sum();
        assert!((w.balance - (w.initial + total)).abs() < 1e-9);

        // Double close refused.
        assert!(store
            .close_position(&p, 0.65, 0.02, ExitReason::Manual, now)
            .await
            .is_err());

        assert_eq!(store.audit_count("trade_closed").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn daily_pnl_rolls_at_utc_midnight() {
        let (_dir, store) = test_store();
        let day0 = 1_770_163_200; // a UTC midnight
        store.seed(500.0, day0 + 100).await.unwrap();
        let m = sample_market("GEMI-BTC2602041700-HI67500");
        store.upsert_market(&m).await.unwrap();
        let mut p = sample_position(&m);
        p.id = store.insert_position(&p).await.unwrap();
        store
            .close_position(&p, 0.55, 0.0, ExitReason::StopLoss, day0 + 200)
            .await
            .unwrap();
        let w = store.wallet().await.unwrap();
        assert!(w.daily_pnl < 0.0);

        let w = store.roll_daily(day0 + 86_400 + 5).await.unwrap();
        assert_eq!(w.daily_pnl, 0.0);
        assert_eq!(w.daily_start_ts, day0 + 86_400);
    }

    #[tokio::test]
    async fn params_clamp_and_audit() {
        let (_dir, store) = test_store();
        let now = now_ts();
        store.seed(500.0, now).await.unwrap();

        let applied = store.set_param("score_threshold", 120.0, now).await.unwrap();
        assert_eq!(applied, 80.0);
        let p = store.params_snapshot().await.unwrap();
        assert_eq!(p.score_threshold(), 80.0);

        assert!(store.set_param("not_a_param", 1.0, now).await.is_err());
        assert_eq!(store.audit_count("param_change").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn quote_ring_purges() {
        let (_dir, store) = test_store();
        let m = sample_market("GEMI-BTC2602041700-HI67500");
        store.upsert_market(&m).await.unwrap();
        let q = Quote {
            bid: 0.5,
            ask: 0.52,
            last: 0.51,
            bid_depth: None,
            ask_depth: None,
            ts: 100,
        };
        store
            .insert_quotes(&[(m.id.clone(), Venue::Gemini, q)])
            .await
            .unwrap();
        assert_eq!(
            store.recent_quotes(&m.id, Venue::Gemini, 10).await.unwrap().len(),
            1
        );
        store.purge_quotes(200).await.unwrap();
        assert!(store
            .recent_quotes(&m.id, Venue::Gemini, 10)
            .await
            .unwrap()
            .is_empty());
    }
}
