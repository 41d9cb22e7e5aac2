//! Rate limiting and retry policy shared by the venue clients.

use anyhow::Result;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::{FailKind, VenueError};

/// Backoff ladder applied on HTTP 429 before surfacing the error.
const RATE_LIMIT_BACKOFF_SECS: [u64; 3] = [3, 6, 12];

/// Transport retries before surfacing the error to the caller.
const MAX_TRANSPORT_RETRIES: u32 = 3;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket request limiter. Each client owns one per API family.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut st = self.state.lock().await;
                let elapsed = st.last_refill.elapsed().as_secs_f64();
                st.tokens = (st.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                st.last_refill = Instant::now();

                if st.tokens >= 1.0 {
                    st.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - st.tokens;
                Duration::from_secs_f64(deficit / self.refill_per_sec)
            };
            debug!("rate limit: waiting {}ms", wait.as_millis());
            sleep(wait).await;
        }
    }
}

/// Execute a request with the shared retry policy.
///
/// - 429: sleep 3 s / 6 s / 12 s, then surface.
/// - Timeouts, connection errors, 5xx: retry up to 3 times.
/// - 401/403: no retry, surface immediately as an auth failure.
/// - Other 4xx: surface as a business failure.
pub async fn execute_with_retry(
    req: reqwest::RequestBuilder,
    label: &str,
) -> Result<reqwest::Response> {
    let mut rate_limit_hits = 0usize;

    for attempt in 0..MAX_TRANSPORT_RETRIES {
        let Some(cloned) = req.try_clone() else {
            // Streaming bodies cannot be retried; single shot.
            return match req.send().await {
                Ok(resp) => classify(resp, label).await,
                Err(e) => Err(VenueError::new(FailKind::Transport, format!("{label}: {e}")).into()),
            };
        };

        match cloned.send().await {
            Ok(resp) => {
                let status = resp.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    if rate_limit_hits >= RATE_LIMIT_BACKOFF_SECS.len() {
                        return Err(VenueError::new(
                            FailKind::Transport,
                            format!("{label}: rate limited after backoff"),
                        )
                        .into());
                    }
                    let backoff = RATE_LIMIT_BACKOFF_SECS[rate_limit_hits];
                    rate_limit_hits += 1;
                    warn!(label, backoff_secs = backoff, "429, backing off");
                    sleep(Duration::from_secs(backoff)).await;
                    continue;
                }
                if status.is_server_error() {
                    warn!(label, status = %status, attempt, "server error, retrying");
                    sleep(Duration::from_millis(250 * (attempt as u64 + 1))).await;
                    continue;
                }
                return classify(resp, label).await;
            }
            Err(e) => {
                warn!(label, attempt, error = %e, "transport error");
                if attempt + 1 >= MAX_TRANSPORT_RETRIES {
                    return Err(
                        VenueError::new(FailKind::Transport, format!("{label}: {e}")).into()
                    );
                }
                sleep(Duration::from_millis(250 * (attempt as u64 + 1))).await;
            }
        }
    }

    Err(VenueError::new(FailKind::Transport, format!("{label}: retries exhausted")).into())
}

async fn classify(resp: reqwest::Response, label: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailKind::Auth,
        s if s.is_client_error() => FailKind::Business,
        _ => FailKind::Transport,
    };
    Err(VenueError::new(kind, format!("{label}: {status}: {body}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_serves_capacity_then_throttles() {
        let bucket = TokenBucket::new(2, 1000.0);
        let start = Instant::now();
        bucket.acquire().await;
        bucket.acquire().await;
        // Refill is fast enough in the test that the third take stays sub-second.
        bucket.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
