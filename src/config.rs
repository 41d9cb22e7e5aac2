//! Environment configuration.
//!
//! Everything tunable at process start comes from the environment (plus CLI
//! overrides in main). Runtime-tunable scalars live in the parameter store
//! instead, so they survive restarts and stay clamped.

use anyhow::{bail, Result};
use std::collections::HashMap;

/// Process trading mode. Fixed for the process lifetime; never flips at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Paper,
    Live,
    /// Live execution semantics against the venue's sandbox environment.
    Sandbox,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Paper => "paper",
            Mode::Live => "live",
            Mode::Sandbox => "sandbox",
        }
    }

    /// Whether entries on live-prefixed instruments route real orders.
    pub fn executes_live(&self) -> bool {
        matches!(self, Mode::Live | Mode::Sandbox)
    }
}

/// Volatility input selection for the binary-option pricer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolSource {
    /// Constant annualized volatility from the `volatility` parameter.
    Fixed,
    /// Implied from the Kalshi bracket lattice, fixed fallback when illiquid.
    Implied,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub port: u16,
    pub database_path: String,
    /// Persistent home of the Gemini nonce counter.
    pub nonce_path: String,
    pub initial_balance: f64,

    pub gemini_api_key: Option<String>,
    pub gemini_api_secret: Option<String>,
    pub gemini_base_url: String,

    pub kalshi_api_key_id: Option<String>,
    pub kalshi_private_key_pem: Option<String>,
    pub kalshi_base_url: String,

    pub webhook_url: Option<String>,

    /// Spot symbols polled from Binance, e.g. ["BTCUSDT", "ETHUSDT", "SOLUSDT"].
    pub spot_symbols: Vec<String>,
    pub vol_source: VolSource,

    /// Seed for the paper-fill simulator. Fixed seed => reproducible trades.
    pub paper_fill_seed: u64,

    /// Per-market fee overrides (symbol -> per-side fee), JSON object in env.
    pub fee_overrides: HashMap<String, f64>,

    /// Only symbols with this prefix ever route live orders.
    pub live_instrument_prefix: String,

    pub sportsbook_oracle_url: Option<String>,
    pub crowd_oracle_url: Option<String>,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mode = match env_opt("EDGEBOT_MODE").as_deref() {
            None | Some("paper") => Mode::Paper,
            Some("live") => Mode::Live,
            Some("sandbox") => Mode::Sandbox,
            Some(other) => bail!("unknown EDGEBOT_MODE '{other}' (paper|live|sandbox)"),
        };

        let gemini_base_url = match mode {
            Mode::Sandbox => env_opt("GEMINI_BASE_URL")
                .unwrap_or_else(|| "https://api.sandbox.gemini.com".to_string()),
            _ => env_opt("GEMINI_BASE_URL").unwrap_or_else(|| "https://api.gemini.com".to_string()),
        };

        // Private key may be inlined or given as a file path.
        let kalshi_private_key_pem = match env_opt("KALSHI_PRIVATE_KEY_PEM") {
            Some(pem) => Some(pem),
            None => match env_opt("KALSHI_PRIVATE_KEY_PATH") {
                Some(path) => Some(std::fs::read_to_string(&path).map_err(|e| {
                    anyhow::anyhow!("failed to read KALSHI_PRIVATE_KEY_PATH {path}: {e}")
                })?),
                None => None,
            },
        };

        let spot_symbols = env_opt("EDGEBOT_SPOT_SYMBOLS")
            .unwrap_or_else(|| "BTCUSDT,ETHUSDT,SOLUSDT".to_string())
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let vol_source = match env_opt("EDGEBOT_VOL_SOURCE").as_deref() {
            None | Some("fixed") => VolSource::Fixed,
            Some("implied") => VolSource::Implied,
            Some(other) => bail!("unknown EDGEBOT_VOL_SOURCE '{other}' (fixed|implied)"),
        };

        let fee_overrides = match env_opt("EDGEBOT_FEE_OVERRIDES") {
            Some(json) => serde_json::from_str::<HashMap<String, f64>>(&json)
                .map_err(|e| anyhow::anyhow!("EDGEBOT_FEE_OVERRIDES is not a JSON object: {e}"))?,
            None => HashMap::new(),
        };

        let cfg = Self {
            mode,
            port: env_or("PORT", 8080u16),
            database_path: env_opt("DATABASE_PATH").unwrap_or_else(|| "./edgebot.db".to_string()),
            nonce_path: env_opt("EDGEBOT_NONCE_PATH")
                .unwrap_or_else(|| "./edgebot.nonce".to_string()),
            initial_balance: env_or("EDGEBOT_INITIAL_BALANCE", 500.0f64),
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            gemini_api_secret: env_opt("GEMINI_API_SECRET"),
            gemini_base_url,
            kalshi_api_key_id: env_opt("KALSHI_API_KEY_ID"),
            kalshi_private_key_pem,
            kalshi_base_url: env_opt("KALSHI_BASE_URL")
                .unwrap_or_else(|| "https://api.elections.kalshi.com".to_string()),
            webhook_url: env_opt("EDGEBOT_WEBHOOK_URL"),
            spot_symbols,
            vol_source,
            paper_fill_seed: env_or("EDGEBOT_PAPER_FILL_SEED", 7u64),
            fee_overrides,
            live_instrument_prefix: env_opt("EDGEBOT_LIVE_PREFIX")
                .unwrap_or_else(|| "GEMI-".to_string()),
            sportsbook_oracle_url: env_opt("EDGEBOT_SPORTSBOOK_ORACLE_URL"),
            crowd_oracle_url: env_opt("EDGEBOT_CROWD_ORACLE_URL"),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Required credentials must exist for the declared mode before anything starts.
    pub fn validate(&self) -> Result<()> {
        if self.mode.executes_live() {
            if self.gemini_api_key.is_none() || self.gemini_api_secret.is_none() {
                bail!(
                    "mode '{}' requires GEMINI_API_KEY and GEMINI_API_SECRET",
                    self.mode.as_str()
                );
            }
        }
        if self.initial_balance <= 0.0 {
            bail!("EDGEBOT_INITIAL_BALANCE must be positive");
        }
        if self.spot_symbols.is_empty() {
            bail!("EDGEBOT_SPOT_SYMBOLS must name at least one symbol");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            mode: Mode::Paper,
            port: 8080,
            database_path: ":memory:".to_string(),
            nonce_path: "/tmp/test.nonce".to_string(),
            initial_balance: 500.0,
            gemini_api_key: None,
            gemini_api_secret: None,
            gemini_base_url: "https://api.gemini.com".to_string(),
            kalshi_api_key_id: None,
            kalshi_private_key_pem: None,
            kalshi_base_url: "https://api.elections.kalshi.com".to_string(),
            webhook_url: None,
            spot_symbols: vec!["BTCUSDT".to_string()],
            vol_source: VolSource::Fixed,
            paper_fill_seed: 7,
            fee_overrides: HashMap::new(),
            live_instrument_prefix: "GEMI-".to_string(),
            sportsbook_oracle_url: None,
            crowd_oracle_url: None,
        }
    }

    #[test]
    fn paper_mode_needs_no_credentials() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn live_mode_requires_gemini_credentials() {
        let mut cfg = base_config();
        cfg.mode = Mode::Live;
        assert!(cfg.validate().is_err());

        cfg.gemini_api_key = Some("key".to_string());
        cfg.gemini_api_secret = Some("secret".to_string());
        assert!(cfg.validate().is_ok());
    }
}
