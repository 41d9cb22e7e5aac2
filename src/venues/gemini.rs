//! Gemini prediction-markets client (venue A, writable).
//!
//! Auth is an HMAC-SHA384 over the base64-encoded JSON payload. The payload
//! carries the request path, a strictly increasing integer nonce (seconds
//! resolution, persisted across restarts), and the literal `account` token.

use anyhow::{Context, Result};
use base64::Engine;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha384;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::throttle::{execute_with_retry, TokenBucket};
use super::{
    BookTop, FailKind, MarketDescriptor, OrderReport, OrderRequest, VenueClient, VenueError,
    VenuePosition,
};
use crate::models::{Category, Direction, Quote, Venue};

const ORDER_PATH: &str = "/v1/prediction-markets/order";
const CANCEL_PATH: &str = "/v1/prediction-markets/order/cancel";
const OPEN_ORDERS_PATH: &str = "/v1/prediction-markets/orders";
const ORDER_HISTORY_PATH: &str = "/v1/prediction-markets/orders/history";
const POSITIONS_PATH: &str = "/v1/prediction-markets/positions";
const BALANCE_PATH: &str = "/v1/prediction-markets/balance";

const BALANCE_CACHE_SECS: u64 = 30;

type HmacSha384 = Hmac<Sha384>;

/// Strictly increasing seconds-resolution nonce, persisted to a state file so
/// restarts never replay a value.
pub struct NonceCounter {
    path: PathBuf,
    last: Mutex<i64>,
}

impl NonceCounter {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let last = match std::fs::read_to_string(&path) {
            Ok(s) => s.trim().parse::<i64>().unwrap_or(0),
            Err(_) => 0,
        };
        Ok(Self {
            path,
            last: Mutex::new(last),
        })
    }

    /// Next nonce: wall-clock seconds, bumped by one when two requests land in
    /// the same second. Persisted before use.
    pub async fn next(&self) -> Result<i64> {
        let mut last = self.last.lock().await;
        let now = chrono::Utc::now().timestamp();
        let nonce = if now > *last { now } else { *last + 1 };
        *last = nonce;
        std::fs::write(&self.path, nonce.to_string())
            .with_context(|| format!("persist nonce to {}", self.path.display()))?;
        Ok(nonce)
    }

    /// Resynchronize after a venue nonce-window rejection.
    pub async fn resync(&self, server_secs: i64) -> Result<()> {
        let mut last = self.last.lock().await;
        *last = (*last).max(server_secs + 1);
        std::fs::write(&self.path, last.to_string())
            .with_context(|| format!("persist nonce to {}", self.path.display()))?;
        Ok(())
    }
}

pub struct GeminiClient {
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    http: Client,
    limiter: TokenBucket,
    nonce: NonceCounter,
    quote_cache: RwLock<HashMap<String, Quote>>,
    balance_cache: parking_lot::Mutex<Option<(f64, Instant)>>,
    /// Symbols the venue rejected as unknown; skipped until the next match cycle.
    unavailable: RwLock<HashSet<String>>,
}

impl GeminiClient {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        api_secret: Option<String>,
        nonce_path: &str,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("edgebot/0.1")
            .build()
            .context("build gemini http client")?;
        Ok(Self {
            base_url,
            api_key,
            api_secret,
            http,
            limiter: TokenBucket::new(10, 5.0),
            nonce: NonceCounter::load(nonce_path)?,
            quote_cache: RwLock::new(HashMap::new()),
            balance_cache: parking_lot::Mutex::new(None),
            unavailable: RwLock::new(HashSet::new()),
        })
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (self.api_key.as_deref(), self.api_secret.as_deref()) {
            (Some(k), Some(s)) => Ok((k, s)),
            _ => Err(VenueError::new(FailKind::Auth, "gemini credentials not configured").into()),
        }
    }

    /// base64(payload JSON) and its hex HMAC-SHA384 signature.
    fn sign(secret: &str, payload_json: &str) -> (String, String) {
        let b64 = base64::engine::general_purpose::STANDARD.encode(payload_json);
        let mut mac =
            HmacSha384::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(b64.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        (b64, sig)
    }

    fn build_payload(path: &str, nonce: i64, extra: &serde_json::Value) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "request": path,
            "nonce": nonce,
            "account": "primary",
        });
        if let (Some(obj), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        payload
    }

    async fn private_post(&self, path: &str, extra: serde_json::Value) -> Result<serde_json::Value> {
        let first = self.private_post_once(path, &extra).await;
        match first {
            Err(err) if is_nonce_error(&err) => {
                let server_secs = err
                    .downcast_ref::<VenueError>()
                    .and_then(|e| extract_server_secs(&e.msg))
                    .unwrap_or_else(|| chrono::Utc::now().timestamp());
                warn!(path, server_secs, "nonce out of window, resyncing");
                self.nonce.resync(server_secs).await?;
                self.private_post_once(path, &extra).await
            }
            other => other,
        }
    }

    async fn private_post_once(
        &self,
        path: &str,
        extra: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let (key, secret) = self.credentials()?;
        self.limiter.acquire().await;

        let nonce = self.nonce.next().await?;
        let payload = Self::build_payload(path, nonce, extra);
        let payload_json = payload.to_string();
        let (b64, sig) = Self::sign(secret, &payload_json);

        let url = format!("{}{}", self.base_url, path);
        let req = self
            .http
            .post(&url)
            .header("X-API-KEY", key)
            .header("X-PAYLOAD", b64)
            .header("X-SIGNATURE", sig)
            .header("Content-Length", "0");

        let resp = execute_with_retry(req, path).await?;
        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| VenueError::new(FailKind::Schema, format!("{path}: {e}")))?;

        if let Some(reason) = value.get("reason").and_then(|r| r.as_str()) {
            if value.get("result").and_then(|r| r.as_str()) == Some("error") {
                return Err(VenueError::new(
                    FailKind::Business,
                    format!("{path}: {reason}: {}", value["message"].as_str().unwrap_or("")),
                )
                .into());
            }
        }
        Ok(value)
    }

    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderReport> {
        let mut extra = serde_json::json!({
            "symbol": order.symbol,
            "orderType": "limit",
            "side": order.side.as_str(),
            "outcome": match order.outcome {
                Direction::Yes => "yes",
                Direction::No => "no",
            },
            "quantity": format!("{:.4}", order.quantity),
            "price": format!("{:.4}", order.price),
            "timeInForce": "good-til-cancel",
            "clientOrderId": order.client_order_id,
        });
        if order.maker_only {
            extra["options"] = serde_json::json!(["maker-or-cancel"]);
        }

        let value = match self.private_post(ORDER_PATH, extra).await {
            Ok(v) => v,
            Err(e) => {
                // Unknown symbols sit out until the next match cycle rebuilds
                // the listing.
                if let Some(ve) = e.downcast_ref::<VenueError>() {
                    let msg = ve.msg.to_ascii_lowercase();
                    if ve.kind == FailKind::Business
                        && msg.contains("symbol")
                        && (msg.contains("unknown") || msg.contains("invalid"))
                    {
                        self.mark_unavailable(&order.symbol);
                    }
                }
                return Err(e);
            }
        };
        let report: WireOrderReport = serde_json::from_value(value)
            .map_err(|e| VenueError::new(FailKind::Schema, format!("order report: {e}")))?;
        info!(
            symbol = %order.symbol,
            order_id = %report.order_id,
            status = %report.status,
            "order placed"
        );
        Ok(report.into())
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let value = self
            .private_post(CANCEL_PATH, serde_json::json!({ "orderId": order_id }))
            .await?;
        if value.get("result").and_then(|r| r.as_str()) == Some("ok") {
            Ok(())
        } else {
            Err(VenueError::new(FailKind::Business, format!("cancel {order_id}: {value}")).into())
        }
    }

    pub async fn open_orders(&self) -> Result<Vec<OrderReport>> {
        let value = self.private_post(OPEN_ORDERS_PATH, serde_json::json!({})).await?;
        let reports: Vec<WireOrderReport> = serde_json::from_value(value)
            .map_err(|e| VenueError::new(FailKind::Schema, format!("open orders: {e}")))?;
        Ok(reports.into_iter().map(Into::into).collect())
    }

    pub async fn order_history(&self, limit: usize) -> Result<Vec<OrderReport>> {
        let value = self
            .private_post(ORDER_HISTORY_PATH, serde_json::json!({ "limit": limit }))
            .await?;
        let reports: Vec<WireOrderReport> = serde_json::from_value(value)
            .map_err(|e| VenueError::new(FailKind::Schema, format!("order history: {e}")))?;
        Ok(reports.into_iter().map(Into::into).collect())
    }

    pub async fn positions(&self) -> Result<Vec<VenuePosition>> {
        let value = self.private_post(POSITIONS_PATH, serde_json::json!({})).await?;
        let wire: Vec<WirePosition> = serde_json::from_value(value)
            .map_err(|e| VenueError::new(FailKind::Schema, format!("positions: {e}")))?;
        Ok(wire
            .into_iter()
            .map(|p| VenuePosition {
                symbol: p.symbol,
                outcome: if p.outcome.eq_ignore_ascii_case("no") {
                    Direction::No
                } else {
                    Direction::Yes
                },
                quantity: p.quantity.parse().unwrap_or(0.0),
            })
            .collect())
    }

    /// Available balance, cached for 30 s.
    pub async fn available_balance(&self) -> Result<f64> {
        if let Some((balance, at)) = *self.balance_cache.lock() {
            if at.elapsed() < Duration::from_secs(BALANCE_CACHE_SECS) {
                return Ok(balance);
            }
        }
        let value = self.private_post(BALANCE_PATH, serde_json::json!({})).await?;
        let balance = value
            .get("available")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| value.get("available").and_then(|v| v.as_f64()))
            .ok_or_else(|| VenueError::new(FailKind::Schema, "balance: missing 'available'"))?;
        *self.balance_cache.lock() = Some((balance, Instant::now()));
        Ok(balance)
    }

    /// Unknown-symbol quarantine, cleared by the matcher each cycle.
    pub fn mark_unavailable(&self, symbol: &str) {
        self.unavailable.write().insert(symbol.to_string());
    }

    pub fn clear_unavailable(&self) {
        self.unavailable.write().clear();
    }

    pub fn is_unavailable(&self, symbol: &str) -> bool {
        self.unavailable.read().contains(symbol)
    }
}

#[async_trait::async_trait]
impl VenueClient for GeminiClient {
    fn venue(&self) -> Venue {
        Venue::Gemini
    }

    async fn list_markets(&self, categories: &[Category]) -> Result<Vec<MarketDescriptor>> {
        self.limiter.acquire().await;
        let cats = categories
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}/v1/prediction-markets/markets?categories={cats}",
            self.base_url
        );
        let resp = execute_with_retry(self.http.get(&url), "gemini markets").await?;
        let wire: Vec<WireMarket> = resp
            .json()
            .await
            .map_err(|e| VenueError::new(FailKind::Schema, format!("markets: {e}")))?;
        Ok(wire
            .into_iter()
            .map(|m| MarketDescriptor {
                id: m.symbol,
                title: m.title,
                category: Category::parse(&m.category),
                close_ts: m.close_ts,
                floor_strike: None,
                cap_strike: None,
                volume: m.volume,
                event_id: None,
            })
            .collect())
    }

    async fn batch_quotes(&self, market_ids: &[String]) -> Result<HashMap<String, Quote>> {
        if market_ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.limiter.acquire().await;

        let symbols = {
            let unavailable = self.unavailable.read();
            market_ids
                .iter()
                .filter(|s| !unavailable.contains(*s))
                .cloned()
                .collect::<Vec<_>>()
        };
        let url = format!(
            "{}/v1/prediction-markets/tickers?symbols={}",
            self.base_url,
            symbols.join(",")
        );
        let resp = execute_with_retry(self.http.get(&url), "gemini tickers").await?;
        let wire: Vec<WireTicker> = resp
            .json()
            .await
            .map_err(|e| VenueError::new(FailKind::Schema, format!("tickers: {e}")))?;

        let now = chrono::Utc::now().timestamp();
        let mut out = HashMap::new();
        for t in wire {
            let Some(quote) = t.to_quote(now) else {
                debug!(symbol = %t.symbol, "dropping malformed ticker record");
                continue;
            };
            out.insert(t.symbol.clone(), quote);
        }
        self.quote_cache.write().extend(out.clone());
        Ok(out)
    }

    async fn book_top(&self, market_id: &str) -> Result<BookTop> {
        self.limiter.acquire().await;
        let url = format!("{}/v1/prediction-markets/book/{market_id}", self.base_url);
        let resp = execute_with_retry(self.http.get(&url), "gemini book").await?;
        let wire: WireBook = resp
            .json()
            .await
            .map_err(|e| VenueError::new(FailKind::Schema, format!("book: {e}")))?;
        Ok(wire.into())
    }

    fn cached_quote(&self, market_id: &str) -> Option<Quote> {
        self.quote_cache.read().get(market_id).copied()
    }
}

fn is_nonce_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<VenueError>()
        .map(|e| e.kind == FailKind::Business && e.msg.to_ascii_lowercase().contains("nonce"))
        .unwrap_or(false)
}

/// Pull a plausible unix-seconds value out of a venue error message.
fn extract_server_secs(msg: &str) -> Option<i64> {
    let mut current = String::new();
    let mut best: Option<i64> = None;
    for ch in msg.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_digit() {
            current.push(ch);
        } else {
            if current.len() == 10 {
                if let Ok(v) = current.parse::<i64>() {
                    best = Some(v);
                }
            }
            current.clear();
        }
    }
    best
}

// Wire types.

#[derive(Debug, Deserialize)]
struct WireMarket {
    symbol: String,
    title: String,
    #[serde(default)]
    category: String,
    #[serde(rename = "closeTimestamp")]
    close_ts: Option<i64>,
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireTicker {
    symbol: String,
    bid: Option<String>,
    ask: Option<String>,
    last: Option<String>,
    #[serde(rename = "bidQuantity")]
    bid_qty: Option<String>,
    #[serde(rename = "askQuantity")]
    ask_qty: Option<String>,
}

impl WireTicker {
    fn to_quote(&self, now: i64) -> Option<Quote> {
        let bid = self.bid.as_deref()?.parse::<f64>().ok()?;
        let ask = self.ask.as_deref()?.parse::<f64>().ok()?;
        let last = self
            .last
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or((bid + ask) / 2.0);
        if !(bid.is_finite() && ask.is_finite() && bid >= 0.0 && ask > 0.0) {
            return None;
        }
        Some(Quote {
            bid,
            ask,
            last,
            bid_depth: self.bid_qty.as_deref().and_then(|s| s.parse().ok()),
            ask_depth: self.ask_qty.as_deref().and_then(|s| s.parse().ok()),
            ts: now,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireBookLevel {
    price: String,
    quantity: String,
}

#[derive(Debug, Deserialize)]
struct WireBook {
    #[serde(default)]
    bids: Vec<WireBookLevel>,
    #[serde(default)]
    asks: Vec<WireBookLevel>,
}

impl From<WireBook> for BookTop {
    fn from(book: WireBook) -> Self {
        let level = |l: &WireBookLevel| -> Option<(f64, f64)> {
            Some((l.price.parse().ok()?, l.quantity.parse().ok()?))
        };
        BookTop {
            bid: book.bids.first().and_then(level),
            ask: book.asks.first().and_then(level),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireOrderReport {
    #[serde(rename = "orderId")]
    order_id: String,
    status: String,
    #[serde(rename = "avgExecutionPrice")]
    avg_execution_price: Option<String>,
    #[serde(rename = "filledQuantity")]
    filled_quantity: Option<String>,
    #[serde(rename = "remainingQuantity")]
    remaining_quantity: Option<String>,
}

impl From<WireOrderReport> for OrderReport {
    fn from(w: WireOrderReport) -> Self {
        let parse = |s: &Option<String>| s.as_deref().and_then(|v| v.parse::<f64>().ok());
        OrderReport {
            order_id: w.order_id,
            status: w.status,
            avg_execution_price: parse(&w.avg_execution_price),
            filled_quantity: parse(&w.filled_quantity).unwrap_or(0.0),
            remaining_quantity: parse(&w.remaining_quantity).unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WirePosition {
    symbol: String,
    outcome: String,
    quantity: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nonce_is_strictly_increasing_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonce");

        let counter = NonceCounter::load(&path).unwrap();
        let a = counter.next().await.unwrap();
        let b = counter.next().await.unwrap();
        let c = counter.next().await.unwrap();
        assert!(b > a && c > b, "same-second calls must bump by one");

        // A restart resumes past the persisted high-water mark.
        let counter2 = NonceCounter::load(&path).unwrap();
        let d = counter2.next().await.unwrap();
        assert!(d > c);
    }

    #[tokio::test]
    async fn nonce_resync_moves_forward_only() {
        let dir = tempfile::tempdir().unwrap();
        let counter = NonceCounter::load(dir.path().join("nonce")).unwrap();
        let a = counter.next().await.unwrap();
        counter.resync(a - 100).await.unwrap();
        let b = counter.next().await.unwrap();
        assert!(b > a);
    }

    #[test]
    fn signature_is_deterministic_hex_sha384() {
        let (b64, sig) = GeminiClient::sign("topsecret", r#"{"request":"/v1/x","nonce":1}"#);
        let (b64_2, sig_2) = GeminiClient::sign("topsecret", r#"{"request":"/v1/x","nonce":1}"#);
        assert_eq!(b64, b64_2);
        assert_eq!(sig, sig_2);
        // SHA-384 -> 48 bytes -> 96 hex chars.
        assert_eq!(sig.len(), 96);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn payload_carries_path_nonce_account() {
        let payload = GeminiClient::build_payload(
            ORDER_PATH,
            1_770_000_000,
            &serde_json::json!({ "symbol": "GEMI-BTC2602041700-HI67500" }),
        );
        assert_eq!(payload["request"], ORDER_PATH);
        assert_eq!(payload["nonce"], 1_770_000_000i64);
        assert_eq!(payload["account"], "primary");
        assert_eq!(payload["symbol"], "GEMI-BTC2602041700-HI67500");
    }

    #[test]
    fn server_secs_extraction() {
        assert_eq!(
            extract_server_secs("nonce should be within 30s of 1770000123"),
            Some(1_770_000_123)
        );
        assert_eq!(extract_server_secs("no digits here"), None);
    }

    #[test]
    fn ticker_parse_drops_malformed() {
        let good = WireTicker {
            symbol: "GEMI-BTC2602041700-HI67500".into(),
            bid: Some("0.57".into()),
            ask: Some("0.61".into()),
            last: Some("0.58".into()),
            bid_qty: Some("200".into()),
            ask_qty: Some("400".into()),
        };
        let q = good.to_quote(1000).unwrap();
        assert_eq!(q.bid, 0.57);
        assert_eq!(q.ask_depth, Some(400.0));

        let bad = WireTicker {
            symbol: "X".into(),
            bid: Some("not-a-number".into()),
            ask: Some("0.61".into()),
            last: None,
            bid_qty: None,
            ask_qty: None,
        };
        assert!(bad.to_quote(1000).is_none());
    }
}
