//! Operator API routes.
//!
//! Health, emergency stop, single-position close, rematch, parameter
//! read/write, manual match overrides, and the audit tail. This surface is
//! for the operator; the trading pipeline never depends on it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::matcher::ManualOverride;
use crate::models::now_ts;
use crate::scheduler::Scheduler;
use crate::trading::TickContext;

pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/emergency-stop", post(emergency_stop))
        .route("/positions/:id/close", post(close_position))
        .route("/rematch", post(rematch))
        .route("/params", get(get_params).post(set_param))
        .route("/matches/override", post(add_override))
        .route("/audit", get(audit_tail))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, String)>;

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn health(State(state): State<Arc<ApiState>>) -> ApiResult {
    let s = &state.scheduler;
    let now = now_ts();

    let wallet = s.store.wallet().await.map_err(internal)?;
    let open_positions = s.store.open_count().await.map_err(internal)?;

    let freshness: HashMap<String, i64> = s
        .state
        .venue_freshness
        .lock()
        .iter()
        .map(|(venue, ts)| (venue.as_str().to_string(), now - ts))
        .collect();

    Ok(Json(serde_json::json!({
        "mode": s.cfg.mode.as_str(),
        "running": s.state.running.load(Ordering::Relaxed),
        "kill_switch": s.state.kill_switch.load(Ordering::Relaxed),
        "circuit_breaker": {
            "open": s.state.breaker.is_open(now),
            "consecutive_failures": s.state.breaker.consecutive_failures(),
            "trips": s.state.breaker.trips(),
        },
        "wallet": {
            "balance": wallet.balance,
            "peak": wallet.peak,
            "daily_pnl": wallet.daily_pnl,
            "drawdown_pct": wallet.drawdown_pct(),
        },
        "open_positions": open_positions,
        "error_counts": s.state.error_counts.lock().clone(),
        "venue_freshness_secs": freshness,
        "spot_freshness_secs": s.spot.freshness_secs(),
    })))
}

/// Close every open position at best-available price and halt new entries.
async fn emergency_stop(State(state): State<Arc<ApiState>>) -> ApiResult {
    let s = &state.scheduler;
    let now = now_ts();
    s.state.running.store(false, Ordering::SeqCst);

    let params = s.state.params.load_full();
    let ctx = TickContext {
        running: false,
        circuit_open: false,
        kill_switch: s.state.kill_switch.load(Ordering::Relaxed),
        now,
    };
    let closed = s
        .engine
        .emergency_close_all(&params, &ctx)
        .await
        .map_err(internal)?;

    s.store
        .audit(
            "emergency_stop",
            serde_json::json!({ "positions_closed": closed }),
            now,
        )
        .await
        .map_err(internal)?;
    s.alerts
        .send("emergency_stop", "operator emergency stop")
        .await;
    info!(closed, "emergency stop executed");

    Ok(Json(serde_json::json!({ "stopped": true, "positions_closed": closed })))
}

async fn close_position(State(state): State<Arc<ApiState>>, Path(id): Path<i64>) -> ApiResult {
    let s = &state.scheduler;
    let params = s.state.params.load_full();
    let ctx = TickContext {
        running: s.state.running.load(Ordering::Relaxed),
        circuit_open: false,
        kill_switch: s.state.kill_switch.load(Ordering::Relaxed),
        now: now_ts(),
    };
    let found = s
        .engine
        .close_by_id(id, &params, &ctx)
        .await
        .map_err(internal)?;
    if !found {
        return Err((StatusCode::NOT_FOUND, format!("position {id} not open")));
    }
    Ok(Json(serde_json::json!({ "closed": id })))
}

/// Queue an immediate match cycle ahead of the five-minute timer.
async fn rematch(State(state): State<Arc<ApiState>>) -> ApiResult {
    state
        .scheduler
        .state
        .rematch_requested
        .store(true, Ordering::SeqCst);
    Ok(Json(serde_json::json!({ "rematch": "queued" })))
}

async fn get_params(State(state): State<Arc<ApiState>>) -> ApiResult {
    let rows = state.scheduler.store.param_rows().await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "parameters": rows })))
}

#[derive(Debug, Deserialize)]
struct SetParamBody {
    key: String,
    value: f64,
}

async fn set_param(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<SetParamBody>,
) -> ApiResult {
    let applied = state
        .scheduler
        .store
        .set_param(&body.key, body.value, now_ts())
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(serde_json::json!({ "key": body.key, "applied": applied })))
}

async fn add_override(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<ManualOverride>,
) -> ApiResult {
    let symbol = body.gemini_symbol.clone();
    state.scheduler.state.overrides.lock().push(body);
    state
        .scheduler
        .state
        .rematch_requested
        .store(true, Ordering::SeqCst);
    Ok(Json(serde_json::json!({ "override": symbol, "rematch": "queued" })))
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

async fn audit_tail(
    State(state): State<Arc<ApiState>>,
    axum::extract::Query(q): axum::extract::Query<AuditQuery>,
) -> ApiResult {
    let rows = state
        .scheduler
        .store
        .audit_recent(q.limit.unwrap_or(100))
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "audit": rows })))
}
