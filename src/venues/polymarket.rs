//! Polymarket client (venue B, read-only).
//!
//! Public REST only: Gamma for market listings, CLOB for top-of-book. The
//! market id we carry is the YES token id, which is what the CLOB books are
//! keyed by.

use anyhow::Result;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::throttle::{execute_with_retry, TokenBucket};
use super::{BookTop, FailKind, MarketDescriptor, VenueClient, VenueError};
use crate::models::{Category, Quote, Venue};

const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";
const CLOB_API_BASE: &str = "https://clob.polymarket.com";

pub struct PolymarketClient {
    http: Client,
    gamma_limiter: TokenBucket,
    clob_limiter: TokenBucket,
    quote_cache: RwLock<HashMap<String, Quote>>,
}

impl PolymarketClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("edgebot/0.1")
            .build()?;
        Ok(Self {
            http,
            gamma_limiter: TokenBucket::new(20, 7.0),
            clob_limiter: TokenBucket::new(50, 40.0),
            quote_cache: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait::async_trait]
impl VenueClient for PolymarketClient {
    fn venue(&self) -> Venue {
        Venue::Polymarket
    }

    async fn list_markets(&self, categories: &[Category]) -> Result<Vec<MarketDescriptor>> {
        self.gamma_limiter.acquire().await;
        let url = format!("{GAMMA_API_BASE}/markets?active=true&closed=false&limit=500");
        let resp = execute_with_retry(self.http.get(&url), "polymarket gamma").await?;
        let wire: Vec<GammaMarket> = resp
            .json()
            .await
            .map_err(|e| VenueError::new(FailKind::Schema, format!("gamma markets: {e}")))?;

        let wanted: Vec<Category> = if categories.is_empty() {
            Category::ALL.to_vec()
        } else {
            categories.to_vec()
        };

        let mut out = Vec::new();
        for m in wire {
            let category = Category::parse(m.category.as_deref().unwrap_or(""));
            if !wanted.contains(&category) {
                continue;
            }
            let Some(token_id) = m.yes_token_id() else {
                debug!(slug = %m.slug, "gamma market without token ids, dropped");
                continue;
            };
            out.push(MarketDescriptor {
                id: token_id,
                title: m.question,
                category,
                close_ts: m
                    .end_date_iso
                    .as_deref()
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.timestamp()),
                floor_strike: None,
                cap_strike: None,
                volume: m.volume,
                event_id: Some(m.slug),
            });
        }
        Ok(out)
    }

    async fn batch_quotes(&self, market_ids: &[String]) -> Result<HashMap<String, Quote>> {
        if market_ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.clob_limiter.acquire().await;

        let url = format!("{CLOB_API_BASE}/books");
        let body: Vec<serde_json::Value> = market_ids
            .iter()
            .map(|id| serde_json::json!({ "token_id": id }))
            .collect();
        let resp =
            execute_with_retry(self.http.post(&url).json(&body), "polymarket books").await?;
        let books: Vec<ClobBook> = resp
            .json()
            .await
            .map_err(|e| VenueError::new(FailKind::Schema, format!("clob books: {e}")))?;

        let now = chrono::Utc::now().timestamp();
        let mut out = HashMap::new();
        for book in books {
            let Some(quote) = book.to_quote(now) else {
                debug!(asset = %book.asset_id, "dropping one-sided/malformed book");
                continue;
            };
            out.insert(book.asset_id.clone(), quote);
        }
        self.quote_cache.write().extend(out.clone());
        Ok(out)
    }

    async fn book_top(&self, market_id: &str) -> Result<BookTop> {
        self.clob_limiter.acquire().await;
        let url = format!("{CLOB_API_BASE}/book?token_id={market_id}");
        let resp = execute_with_retry(self.http.get(&url), "polymarket book").await?;
        let book: ClobBook = resp
            .json()
            .await
            .map_err(|e| VenueError::new(FailKind::Schema, format!("clob book: {e}")))?;
        Ok(book.top())
    }

    fn cached_quote(&self, market_id: &str) -> Option<Quote> {
        self.quote_cache.read().get(market_id).copied()
    }
}

#[derive(Debug, Deserialize)]
struct GammaMarket {
    question: String,
    slug: String,
    category: Option<String>,
    #[serde(rename = "endDateIso")]
    end_date_iso: Option<String>,
    volume: Option<f64>,
    /// JSON-encoded array of [yes, no] token ids.
    #[serde(rename = "clobTokenIds")]
    clob_token_ids: Option<String>,
}

impl GammaMarket {
    fn yes_token_id(&self) -> Option<String> {
        let raw = self.clob_token_ids.as_deref()?;
        let ids: Vec<String> = serde_json::from_str(raw).ok()?;
        ids.into_iter().next()
    }
}

#[derive(Debug, Deserialize)]
struct ClobLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct ClobBook {
    asset_id: String,
    #[serde(default)]
    bids: Vec<ClobLevel>,
    #[serde(default)]
    asks: Vec<ClobLevel>,
}

impl ClobBook {
    fn top(&self) -> BookTop {
        let level = |l: &ClobLevel| -> Option<(f64, f64)> {
            Some((l.price.parse().ok()?, l.size.parse().ok()?))
        };
        // CLOB books are sorted away from the touch; best bid is the max,
        // best ask the min.
        let bid = self
            .bids
            .iter()
            .filter_map(|l| level(l))
            .max_by(|a, b| a.0.total_cmp(&b.0));
        let ask = self
            .asks
            .iter()
            .filter_map(|l| level(l))
            .min_by(|a, b| a.0.total_cmp(&b.0));
        BookTop { bid, ask }
    }

    fn to_quote(&self, now: i64) -> Option<Quote> {
        let top = self.top();
        let (bid, bid_qty) = top.bid?;
        let (ask, ask_qty) = top.ask?;
        if !(bid > 0.0 && ask > bid && ask < 1.0) {
            return None;
        }
        Some(Quote {
            bid,
            ask,
            last: (bid + ask) / 2.0,
            bid_depth: Some(bid_qty),
            ask_depth: Some(ask_qty),
            ts: now,
        })
    }
}
