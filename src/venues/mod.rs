//! Venue clients.
//!
//! One writable venue (Gemini prediction markets) and two read-only reference
//! venues (Polymarket, Kalshi) behind a uniform contract: enumerate markets,
//! fetch batch ticker quotes, fetch per-market book tops. The Gemini client
//! additionally places and cancels orders, and reports positions and balance.

pub mod gemini;
pub mod kalshi;
pub mod polymarket;
pub mod throttle;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::models::{Category, Direction, Quote, Venue};

/// Failure classification driving retry policy and the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    /// Timeout, connection, 5xx. Retried, counts toward the breaker.
    Transport,
    /// 401/403. Never retried; surfaces to the operator.
    Auth,
    /// Unexpected response shape. Record dropped, counts one failure.
    Schema,
    /// Venue-level rejection (unknown symbol, insufficient funds, nonce window).
    Business,
}

impl FailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailKind::Transport => "transport",
            FailKind::Auth => "auth",
            FailKind::Schema => "schema",
            FailKind::Business => "business",
        }
    }
}

/// Typed venue failure, downcastable from `anyhow::Error`.
#[derive(Debug)]
pub struct VenueError {
    pub kind: FailKind,
    pub msg: String,
}

impl VenueError {
    pub fn new(kind: FailKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }
}

impl fmt::Display for VenueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.msg)
    }
}

impl std::error::Error for VenueError {}

/// Classify an anyhow error chain; unknown errors count as transport.
pub fn fail_kind(err: &anyhow::Error) -> FailKind {
    err.downcast_ref::<VenueError>()
        .map(|e| e.kind)
        .unwrap_or(FailKind::Transport)
}

/// One listed market on a venue, normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDescriptor {
    pub id: String,
    pub title: String,
    pub category: Category,
    /// Close/expiry, unix seconds, when the venue reports one.
    pub close_ts: Option<i64>,
    /// Bracket floor strike (Kalshi range markets).
    pub floor_strike: Option<f64>,
    /// Bracket cap strike (Kalshi range markets).
    pub cap_strike: Option<f64>,
    pub volume: Option<f64>,
    /// Event grouping ticker, when the venue has one.
    pub event_id: Option<String>,
}

/// Top of book for one market. Either side may be missing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BookTop {
    pub bid: Option<(f64, f64)>,
    pub ask: Option<(f64, f64)>,
}

impl BookTop {
    pub fn two_sided(&self) -> bool {
        self.bid.is_some() && self.ask.is_some()
    }

    pub fn spread(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some((b, _)), Some((a, _))) => Some((a - b).max(0.0)),
            _ => None,
        }
    }

    pub fn bid_qty(&self) -> f64 {
        self.bid.map(|(_, q)| q).unwrap_or(0.0)
    }

    pub fn ask_qty(&self) -> f64 {
        self.ask.map(|(_, q)| q).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Order submitted to the writable venue.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub outcome: Direction,
    pub quantity: f64,
    pub price: f64,
    /// Client-generated idempotency id, so reconciliation after a hard
    /// shutdown can identify in-flight orders.
    pub client_order_id: String,
    pub maker_only: bool,
}

/// Venue acknowledgement for a placed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReport {
    pub order_id: String,
    pub status: String,
    pub avg_execution_price: Option<f64>,
    pub filled_quantity: f64,
    pub remaining_quantity: f64,
}

impl OrderReport {
    pub fn is_filled(&self) -> bool {
        self.remaining_quantity <= 0.0 && self.filled_quantity > 0.0
    }
}

/// Venue-reported position (for reconciliation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: String,
    pub outcome: Direction,
    pub quantity: f64,
}

/// Uniform read contract over all three venues.
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn venue(&self) -> Venue;

    async fn list_markets(&self, categories: &[Category]) -> Result<Vec<MarketDescriptor>>;

    /// Batch top-of-book quotes. Fills the client's keyed quote cache.
    async fn batch_quotes(&self, market_ids: &[String]) -> Result<HashMap<String, Quote>>;

    /// Book top for one market. May be served from a push-fed cache.
    async fn book_top(&self, market_id: &str) -> Result<BookTop>;

    /// Last cached quote, if any (no network).
    fn cached_quote(&self, market_id: &str) -> Option<Quote>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_kind_downcasts() {
        let err: anyhow::Error = VenueError::new(FailKind::Auth, "denied").into();
        assert_eq!(fail_kind(&err), FailKind::Auth);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(fail_kind(&plain), FailKind::Transport);
    }

    #[test]
    fn book_top_helpers() {
        let top = BookTop {
            bid: Some((0.57, 300.0)),
            ask: Some((0.61, 420.0)),
        };
        assert!(top.two_sided());
        assert!((top.spread().unwrap() - 0.04).abs() < 1e-12);
        assert_eq!(top.ask_qty(), 420.0);

        let one_sided = BookTop {
            bid: Some((0.5, 10.0)),
            ask: None,
        };
        assert!(!one_sided.two_sided());
        assert_eq!(one_sided.spread(), None);
    }
}
