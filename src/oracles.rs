//! Auxiliary probability oracles.
//!
//! Optional per-category sources merged into the reference price: a sportsbook
//! consensus feed and a calibrated-crowd feed. Each enabled oracle is fetched
//! periodically into a cache keyed by matched-market id, and the reference
//! builder looks every enabled oracle up each cycle. An oracle with no URL
//! configured is disabled, not latent.

use anyhow::Result;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::Category;
use crate::venues::throttle::execute_with_retry;
use crate::venues::{FailKind, VenueError};

/// Cached oracle values older than this are not served.
const ORACLE_MAX_AGE_SECS: i64 = 300;

pub const ORACLE_POLL_SECS: u64 = 120;

#[derive(Debug, Clone, Copy)]
struct OraclePoint {
    prob: f64,
    ts: i64,
}

struct OracleSource {
    name: &'static str,
    url: String,
    categories: Vec<Category>,
}

pub struct OracleHub {
    http: Client,
    sources: Vec<OracleSource>,
    /// (oracle name, matched-market id) -> probability.
    cache: RwLock<HashMap<(String, String), OraclePoint>>,
}

impl OracleHub {
    pub fn new(sportsbook_url: Option<String>, crowd_url: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(8))
            .user_agent("edgebot/0.1")
            .build()?;

        let mut sources = Vec::new();
        if let Some(url) = sportsbook_url {
            sources.push(OracleSource {
                name: "sportsbook",
                url,
                categories: vec![Category::Sports],
            });
        }
        if let Some(url) = crowd_url {
            sources.push(OracleSource {
                name: "crowd",
                url,
                categories: vec![Category::Politics, Category::Elections],
            });
        }

        Ok(Self {
            http,
            sources,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn enabled(&self) -> bool {
        !self.sources.is_empty()
    }

    /// One fetch pass over every enabled oracle. Feeds return a flat list of
    /// (matched-market id, probability) pairs keyed by our own market ids; the
    /// mapping is maintained operator-side.
    pub async fn poll_once(&self) {
        for source in &self.sources {
            match self.fetch(source).await {
                Ok(rows) => {
                    let now = chrono::Utc::now().timestamp();
                    let mut cache = self.cache.write();
                    for row in rows {
                        if !(0.0..=1.0).contains(&row.probability) {
                            debug!(oracle = source.name, market = %row.market_id,
                                   prob = row.probability, "out-of-range oracle value dropped");
                            continue;
                        }
                        cache.insert(
                            (source.name.to_string(), row.market_id),
                            OraclePoint {
                                prob: row.probability,
                                ts: now,
                            },
                        );
                    }
                }
                Err(e) => warn!(oracle = source.name, error = %e, "oracle poll failed"),
            }
        }
    }

    async fn fetch(&self, source: &OracleSource) -> Result<Vec<OracleRow>> {
        let resp = execute_with_retry(self.http.get(&source.url), source.name).await?;
        let rows: Vec<OracleRow> = resp
            .json()
            .await
            .map_err(|e| VenueError::new(FailKind::Schema, format!("{}: {e}", source.name)))?;
        Ok(rows)
    }

    /// Per-cycle lookup: fresh oracle probabilities applicable to a market.
    pub fn lookup(&self, matched_id: &str, category: Category) -> Vec<(String, f64)> {
        let now = chrono::Utc::now().timestamp();
        self.lookup_at(matched_id, category, now)
    }

    fn lookup_at(&self, matched_id: &str, category: Category, now: i64) -> Vec<(String, f64)> {
        let cache = self.cache.read();
        self.sources
            .iter()
            .filter(|s| s.categories.contains(&category))
            .filter_map(|s| {
                let point = cache.get(&(s.name.to_string(), matched_id.to_string()))?;
                if now - point.ts > ORACLE_MAX_AGE_SECS {
                    return None;
                }
                Some((s.name.to_string(), point.prob))
            })
            .collect()
    }

    #[cfg(test)]
    pub fn inject(&self, oracle: &str, matched_id: &str, prob: f64, ts: i64) {
        self.cache.write().insert(
            (oracle.to_string(), matched_id.to_string()),
            OraclePoint { prob, ts },
        );
    }
}

#[derive(Debug, Deserialize)]
struct OracleRow {
    market_id: String,
    probability: f64,
}
