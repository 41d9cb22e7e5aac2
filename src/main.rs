//! Edgebot: mispricing-driven trading agent for thin prediction markets.
//!
//! Wiring only. The pipeline lives in the library: venue clients feed the
//! scheduler's fast loop, which builds reference prices and fair values,
//! detects signals, and hands them to the trading engine. This binary loads
//! configuration, opens the store, constructs the clients, spawns the
//! scheduler, and serves the operator API until shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edgebot_backend::{
    alerts::AlertSender,
    api::{self, ApiState},
    config::Config,
    models::now_ts,
    oracles::OracleHub,
    scheduler::{BotState, Scheduler},
    spot::SpotFeed,
    store::Store,
    trading::TradingEngine,
    venues::gemini::GeminiClient,
    venues::kalshi::KalshiClient,
    venues::polymarket::PolymarketClient,
};

#[derive(Debug, Parser)]
#[command(name = "edgebot", about = "prediction-market signal and trading agent")]
struct Args {
    /// Override the bind port from the environment.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Override the database path.
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "edgebot=info,edgebot_backend=info,tower_http=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut cfg = Config::from_env()?;
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(db) = args.database {
        cfg.database_path = db;
    }

    info!(mode = cfg.mode.as_str(), db = %cfg.database_path, "edgebot starting");

    let store = Store::open(&cfg.database_path)?;
    store.seed(cfg.initial_balance, now_ts()).await?;
    let params = store.params_snapshot().await?;

    let gemini = Arc::new(GeminiClient::new(
        cfg.gemini_base_url.clone(),
        cfg.gemini_api_key.clone(),
        cfg.gemini_api_secret.clone(),
        &cfg.nonce_path,
    )?);
    let polymarket = Arc::new(PolymarketClient::new()?);
    let mut kalshi = KalshiClient::new(
        cfg.kalshi_base_url.clone(),
        cfg.kalshi_api_key_id.clone(),
        cfg.kalshi_private_key_pem.as_deref(),
    )?;
    kalshi.spawn_ws();
    let kalshi = Arc::new(kalshi);

    let spot = Arc::new(SpotFeed::new(cfg.spot_symbols.clone())?);
    let oracles = Arc::new(OracleHub::new(
        cfg.sportsbook_oracle_url.clone(),
        cfg.crowd_oracle_url.clone(),
    )?);
    let alerts = Arc::new(AlertSender::new(cfg.webhook_url.clone()));

    let engine = Arc::new(TradingEngine::new(
        store.clone(),
        gemini.clone(),
        cfg.mode,
        cfg.live_instrument_prefix.clone(),
        cfg.fee_overrides.clone(),
        cfg.paper_fill_seed,
    ));

    let state = Arc::new(BotState::new(params));
    let port = cfg.port;
    let scheduler = Arc::new(Scheduler {
        cfg,
        store: store.clone(),
        gemini,
        polymarket,
        kalshi,
        spot,
        oracles,
        engine,
        state,
        alerts,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler.clone().run(shutdown_rx.clone()));

    let app = api::router(Arc::new(ApiState {
        scheduler: scheduler.clone(),
    }));
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("bind port {port}"))?;
    info!(port, "operator API listening");

    let mut api_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "api server exited with error");
        }
    });

    tokio::signal::ctrl_c().await.context("install ctrl-c handler")?;
    info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    let _ = scheduler_handle.await;
    let _ = server.await;
    info!("edgebot stopped");
    Ok(())
}
