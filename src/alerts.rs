//! Webhook alerts.
//!
//! Optional: with no URL configured every send is a no-op. Failures are
//! logged and never propagate into the trading path.

use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

pub struct AlertSender {
    url: Option<String>,
    http: Client,
}

impl AlertSender {
    pub fn new(url: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent("edgebot/0.1")
            .build()
            .unwrap_or_default();
        Self { url, http }
    }

    pub fn enabled(&self) -> bool {
        self.url.is_some()
    }

    pub async fn send(&self, kind: &str, message: &str) {
        self.send_json(serde_json::json!({
            "kind": kind,
            "message": message,
            "ts": chrono::Utc::now().to_rfc3339(),
        }))
        .await;
    }

    pub async fn send_json(&self, payload: serde_json::Value) {
        let Some(url) = &self.url else {
            return;
        };
        match self.http.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("alert delivered");
            }
            Ok(resp) => warn!(status = %resp.status(), "alert webhook rejected"),
            Err(e) => warn!(error = %e, "alert webhook failed"),
        }
    }
}
