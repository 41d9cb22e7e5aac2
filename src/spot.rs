//! Spot price feed.
//!
//! Polls a small fixed set of spot pairs from Binance public REST every 15 s
//! into an in-memory map consulted by the fair-value engine. Values are served
//! while younger than 60 s; beyond that, spot-dependent pricing is suppressed
//! for the cycle.

use anyhow::Result;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::venues::throttle::execute_with_retry;
use crate::venues::{FailKind, VenueError};

pub const SPOT_POLL_SECS: u64 = 15;
const SPOT_MAX_AGE_SECS: i64 = 60;

const BINANCE_API_BASE: &str = "https://api.binance.com";

#[derive(Debug, Clone, Copy)]
struct SpotPoint {
    price: f64,
    ts: i64,
}

pub struct SpotFeed {
    http: Client,
    symbols: Vec<String>,
    prices: RwLock<HashMap<String, SpotPoint>>,
}

impl SpotFeed {
    pub fn new(symbols: Vec<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent("edgebot/0.1")
            .build()?;
        Ok(Self {
            http,
            symbols,
            prices: RwLock::new(HashMap::new()),
        })
    }

    /// One poll pass over all configured symbols. A failed symbol keeps its
    /// previous value and ages out naturally.
    pub async fn poll_once(&self) {
        for symbol in &self.symbols {
            match self.fetch(symbol).await {
                Ok(price) => {
                    let now = chrono::Utc::now().timestamp();
                    self.prices
                        .write()
                        .insert(symbol.clone(), SpotPoint { price, ts: now });
                    debug!(symbol = %symbol, price, "spot updated");
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "spot poll failed"),
            }
        }
    }

    async fn fetch(&self, symbol: &str) -> Result<f64> {
        let url = format!("{BINANCE_API_BASE}/api/v3/ticker/price?symbol={symbol}");
        let resp = execute_with_retry(self.http.get(&url), "binance spot").await?;
        let wire: BinanceTicker = resp
            .json()
            .await
            .map_err(|e| VenueError::new(FailKind::Schema, format!("binance ticker: {e}")))?;
        let price: f64 = wire
            .price
            .parse()
            .map_err(|e| VenueError::new(FailKind::Schema, format!("binance price: {e}")))?;
        if !(price.is_finite() && price > 0.0) {
            return Err(VenueError::new(FailKind::Schema, "non-positive spot price").into());
        }
        Ok(price)
    }

    /// Fresh spot for an asset ("BTC" looks up BTCUSDT). None once stale.
    pub fn price_for_asset(&self, asset: &str) -> Option<f64> {
        let now = chrono::Utc::now().timestamp();
        self.price_for_asset_at(asset, now)
    }

    fn price_for_asset_at(&self, asset: &str, now: i64) -> Option<f64> {
        let prices = self.prices.read();
        let upper = asset.to_ascii_uppercase();
        let point = prices
            .iter()
            .find(|(symbol, _)| {
                symbol.strip_suffix("USDT").unwrap_or(symbol) == upper
                    || symbol.strip_suffix("USD").unwrap_or(symbol) == upper
            })
            .map(|(_, p)| *p)?;
        if now - point.ts > SPOT_MAX_AGE_SECS {
            return None;
        }
        Some(point.price)
    }

    /// Age of the freshest sample, for the health endpoint.
    pub fn freshness_secs(&self) -> Option<i64> {
        let now = chrono::Utc::now().timestamp();
        self.prices.read().values().map(|p| now - p.ts).min()
    }

    #[cfg(test)]
    pub fn inject(&self, symbol: &str, price: f64, ts: i64) {
        self.prices
            .write()
            .insert(symbol.to_string(), SpotPoint { price, ts });
    }
}

#[derive(Debug, Deserialize)]
struct BinanceTicker {
    price: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_spot_is_suppressed() {
        let feed = SpotFeed::new(vec!["BTCUSDT".to_string()]).unwrap();
        feed.inject("BTCUSDT", 67_800.0, 1_000);

        assert_eq!(feed.price_for_asset_at("BTC", 1_030), Some(67_800.0));
        assert_eq!(feed.price_for_asset_at("btc", 1_060), Some(67_800.0));
        // Older than 60 s: suppressed.
        assert_eq!(feed.price_for_asset_at("BTC", 1_061), None);
    }

    #[test]
    fn unknown_asset_is_none() {
        let feed = SpotFeed::new(vec!["BTCUSDT".to_string()]).unwrap();
        feed.inject("BTCUSDT", 67_800.0, 1_000);
        assert_eq!(feed.price_for_asset_at("DOGE", 1_010), None);
    }
}
