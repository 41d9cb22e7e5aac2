//! Kalshi client (venue C, read-only).
//!
//! REST for listings and bracket order books, WebSocket push for live bracket
//! ticks. Authenticated requests carry an RSA-PSS-SHA256 signature over
//! `timestamp ‖ METHOD ‖ path` (path excludes the query string).

use anyhow::{Context, Result};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use reqwest::Client;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::BlindedSigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::throttle::{execute_with_retry, TokenBucket};
use super::{BookTop, FailKind, MarketDescriptor, VenueClient, VenueError};
use crate::models::{Category, Quote, Venue};

/// WebSocket ticks older than this fall back to REST.
const WS_BOOK_MAX_AGE_SECS: i64 = 30;

#[derive(Debug)]
enum WsCommand {
    Subscribe(Vec<String>),
}

#[derive(Clone, Copy)]
struct CachedTop {
    top: BookTop,
    at: i64,
}

pub struct KalshiClient {
    base_url: String,
    key_id: Option<String>,
    signing_key: Option<BlindedSigningKey<Sha256>>,
    http: Client,
    limiter: TokenBucket,
    quote_cache: RwLock<HashMap<String, Quote>>,
    volume_cache: RwLock<HashMap<String, f64>>,
    ws_books: Arc<RwLock<HashMap<String, CachedTop>>>,
    ws_cmd: Option<mpsc::Sender<WsCommand>>,
}

impl KalshiClient {
    pub fn new(
        base_url: String,
        key_id: Option<String>,
        private_key_pem: Option<&str>,
    ) -> Result<Self> {
        let signing_key = match private_key_pem {
            Some(pem) => Some(BlindedSigningKey::<Sha256>::new(parse_private_key(pem)?)),
            None => None,
        };
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("edgebot/0.1")
            .build()
            .context("build kalshi http client")?;
        Ok(Self {
            base_url,
            key_id,
            signing_key,
            http,
            limiter: TokenBucket::new(20, 9.0),
            quote_cache: RwLock::new(HashMap::new()),
            volume_cache: RwLock::new(HashMap::new()),
            ws_books: Arc::new(RwLock::new(HashMap::new())),
            ws_cmd: None,
        })
    }

    /// Spawn the WebSocket subscriber worker. Idempotent per client.
    pub fn spawn_ws(&mut self) {
        if self.ws_cmd.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel::<WsCommand>(256);
        self.ws_cmd = Some(tx);
        let books = self.ws_books.clone();
        let ws_url = self
            .base_url
            .replacen("https://", "wss://", 1)
            + "/trade-api/ws/v2";
        tokio::spawn(async move {
            ws_worker(ws_url, books, rx).await;
        });
    }

    /// Ask the subscriber to track a set of bracket tickers. Non-blocking.
    pub fn subscribe_brackets(&self, tickers: &[String]) {
        if tickers.is_empty() {
            return;
        }
        if let Some(tx) = &self.ws_cmd {
            let _ = tx.try_send(WsCommand::Subscribe(tickers.to_vec()));
        }
    }

    /// Last reported volume for a market, from the batch ticker cache.
    pub fn cached_volume(&self, ticker: &str) -> Option<f64> {
        self.volume_cache.read().get(ticker).copied()
    }

    /// Signature headers for an authenticated request, when credentials exist.
    fn auth_headers(&self, method: &str, path: &str) -> Result<Vec<(&'static str, String)>> {
        let (Some(key_id), Some(signing_key)) = (&self.key_id, &self.signing_key) else {
            return Ok(Vec::new());
        };
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        // Path only, never the query string.
        let bare_path = path.split('?').next().unwrap_or(path);
        let message = format!("{timestamp_ms}{method}{bare_path}");
        let signature = signing_key.sign_with_rng(&mut rand::thread_rng(), message.as_bytes());
        let encoded = base64::engine::general_purpose::STANDARD.encode(signature.to_vec());
        Ok(vec![
            ("KALSHI-ACCESS-KEY", key_id.clone()),
            ("KALSHI-ACCESS-SIGNATURE", encoded),
            ("KALSHI-ACCESS-TIMESTAMP", timestamp_ms.to_string()),
        ])
    }

    async fn get(&self, path: &str, label: &str) -> Result<reqwest::Response> {
        self.limiter.acquire().await;
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.get(&url);
        for (name, value) in self.auth_headers("GET", path)? {
            req = req.header(name, value);
        }
        execute_with_retry(req, label).await
    }
}

fn parse_private_key(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .context("parse kalshi RSA private key (pkcs8 or pkcs1 PEM)")
}

#[async_trait::async_trait]
impl VenueClient for KalshiClient {
    fn venue(&self) -> Venue {
        Venue::Kalshi
    }

    async fn list_markets(&self, categories: &[Category]) -> Result<Vec<MarketDescriptor>> {
        let resp = self
            .get(
                "/trade-api/v2/markets?status=open&limit=1000",
                "kalshi markets",
            )
            .await?;
        let wire: MarketsResponse = resp
            .json()
            .await
            .map_err(|e| VenueError::new(FailKind::Schema, format!("kalshi markets: {e}")))?;

        let wanted: Vec<Category> = if categories.is_empty() {
            Category::ALL.to_vec()
        } else {
            categories.to_vec()
        };

        let mut out = Vec::new();
        for m in wire.markets {
            let category = Category::parse(m.category.as_deref().unwrap_or(""));
            if !wanted.contains(&category) {
                continue;
            }
            out.push(MarketDescriptor {
                id: m.ticker.clone(),
                title: m.title,
                category,
                close_ts: m
                    .close_time
                    .as_deref()
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.timestamp()),
                floor_strike: m.floor_strike,
                cap_strike: m.cap_strike,
                volume: m.volume,
                event_id: Some(m.event_ticker),
            });
        }
        Ok(out)
    }

    async fn batch_quotes(&self, market_ids: &[String]) -> Result<HashMap<String, Quote>> {
        if market_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let path = format!("/trade-api/v2/markets?tickers={}", market_ids.join(","));
        let resp = self.get(&path, "kalshi tickers").await?;
        let wire: MarketsResponse = resp
            .json()
            .await
            .map_err(|e| VenueError::new(FailKind::Schema, format!("kalshi tickers: {e}")))?;

        let now = chrono::Utc::now().timestamp();
        let mut out = HashMap::new();
        for m in wire.markets {
            let Some(quote) = m.to_quote(now) else {
                debug!(ticker = %m.ticker, "dropping unquotable kalshi market");
                continue;
            };
            if let Some(v) = m.volume {
                self.volume_cache.write().insert(m.ticker.clone(), v);
            }
            out.insert(m.ticker.clone(), quote);
        }
        self.quote_cache.write().extend(out.clone());
        Ok(out)
    }

    async fn book_top(&self, market_id: &str) -> Result<BookTop> {
        // Push cache first; REST only when the tick is old or missing.
        let now = chrono::Utc::now().timestamp();
        if let Some(cached) = self.ws_books.read().get(market_id) {
            if now - cached.at <= WS_BOOK_MAX_AGE_SECS {
                return Ok(cached.top);
            }
        }

        let path = format!("/trade-api/v2/markets/{market_id}/orderbook");
        let resp = self.get(&path, "kalshi orderbook").await?;
        let wire: OrderbookResponse = resp
            .json()
            .await
            .map_err(|e| VenueError::new(FailKind::Schema, format!("kalshi orderbook: {e}")))?;
        Ok(wire.orderbook.top())
    }

    fn cached_quote(&self, market_id: &str) -> Option<Quote> {
        self.quote_cache.read().get(market_id).copied()
    }
}

async fn ws_worker(
    ws_url: String,
    books: Arc<RwLock<HashMap<String, CachedTop>>>,
    mut cmd_rx: mpsc::Receiver<WsCommand>,
) {
    let mut desired: HashSet<String> = HashSet::new();
    let mut reconnect_delay = Duration::from_secs(1);
    let max_reconnect_delay = Duration::from_secs(30);
    let mut next_msg_id: u64 = 1;

    loop {
        let (mut ws, _) = match connect_async(&ws_url).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "kalshi ws connect failed, retrying");
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(max_reconnect_delay);
                continue;
            }
        };
        reconnect_delay = Duration::from_secs(1);
        info!("kalshi ws connected");

        if !desired.is_empty() {
            let tickers: Vec<&str> = desired.iter().map(|s| s.as_str()).collect();
            let sub = serde_json::json!({
                "id": next_msg_id,
                "cmd": "subscribe",
                "params": { "channels": ["ticker_v2"], "market_tickers": tickers },
            });
            next_msg_id += 1;
            if ws.send(Message::Text(sub.to_string())).await.is_err() {
                continue;
            }
        }

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(WsCommand::Subscribe(tickers)) => {
                            let fresh: Vec<String> = tickers
                                .into_iter()
                                .filter(|t| desired.insert(t.clone()))
                                .collect();
                            if fresh.is_empty() {
                                continue;
                            }
                            let sub = serde_json::json!({
                                "id": next_msg_id,
                                "cmd": "subscribe",
                                "params": { "channels": ["ticker_v2"], "market_tickers": fresh },
                            });
                            next_msg_id += 1;
                            if ws.send(Message::Text(sub.to_string())).await.is_err() {
                                break;
                            }
                        }
                        None => return,
                    }
                }
                msg = ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(tick) = serde_json::from_str::<WsTickEnvelope>(&text) {
                                if tick.msg_type == "ticker_v2" {
                                    if let Some(t) = tick.msg {
                                        let top = t.top();
                                        books.write().insert(
                                            t.market_ticker,
                                            CachedTop { top, at: chrono::Utc::now().timestamp() },
                                        );
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws.send(Message::Pong(data)).await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "kalshi ws error, reconnecting");
                            break;
                        }
                        None => {
                            warn!("kalshi ws closed, reconnecting");
                            break;
                        }
                    }
                }
            }
        }
        sleep(reconnect_delay).await;
    }
}

// Wire types. Kalshi prices are integer cents.

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    markets: Vec<WireMarket>,
}

#[derive(Debug, Deserialize)]
struct WireMarket {
    ticker: String,
    event_ticker: String,
    title: String,
    category: Option<String>,
    close_time: Option<String>,
    floor_strike: Option<f64>,
    cap_strike: Option<f64>,
    volume: Option<f64>,
    yes_bid: Option<i64>,
    yes_ask: Option<i64>,
    last_price: Option<i64>,
}

impl WireMarket {
    fn to_quote(&self, now: i64) -> Option<Quote> {
        let bid = self.yes_bid? as f64 / 100.0;
        let ask = self.yes_ask? as f64 / 100.0;
        if !(bid >= 0.0 && ask > 0.0 && ask <= 1.0 && ask >= bid) {
            return None;
        }
        let last = self
            .last_price
            .map(|p| p as f64 / 100.0)
            .unwrap_or((bid + ask) / 2.0);
        Some(Quote {
            bid,
            ask,
            last,
            bid_depth: None,
            ask_depth: None,
            ts: now,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OrderbookResponse {
    orderbook: WireOrderbook,
}

/// Kalshi books list YES bids and NO bids; the YES ask is the complement of
/// the best NO bid.
#[derive(Debug, Deserialize)]
struct WireOrderbook {
    #[serde(default)]
    yes: Vec<(i64, i64)>,
    #[serde(default)]
    no: Vec<(i64, i64)>,
}

impl WireOrderbook {
    fn top(&self) -> BookTop {
        let best_yes = self.yes.iter().max_by_key(|(price, _)| *price);
        let best_no = self.no.iter().max_by_key(|(price, _)| *price);
        BookTop {
            bid: best_yes.map(|(p, q)| (*p as f64 / 100.0, *q as f64)),
            ask: best_no.map(|(p, q)| ((100 - *p) as f64 / 100.0, *q as f64)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WsTickEnvelope {
    #[serde(rename = "type")]
    msg_type: String,
    msg: Option<WsTick>,
}

#[derive(Debug, Deserialize)]
struct WsTick {
    market_ticker: String,
    yes_bid: Option<i64>,
    yes_ask: Option<i64>,
}

impl WsTick {
    fn top(&self) -> BookTop {
        BookTop {
            bid: self.yes_bid.map(|p| (p as f64 / 100.0, 0.0)),
            ask: self.yes_ask.map(|p| (p as f64 / 100.0, 0.0)),
        }
    }
}
