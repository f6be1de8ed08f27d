use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::ValueEnum;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{FetchError, TransportError};

const USER_AGENT: &str = concat!("psgc_scraper/", env!("CARGO_PKG_VERSION"));

/// Transport seam: one GET, no retries.
pub trait Fetch: Send + Sync + 'static {
    fn get(&self, url: &str) -> impl Future<Output = Result<Bytes, TransportError>> + Send;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    async fn get(&self, url: &str) -> Result<Bytes, TransportError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(resp.bytes().await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 10,
            delay: Duration::from_secs(5),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                self.delay.saturating_mul(1u32 << shift)
            }
        }
    }
}

/// Shared run-abort flag. Setting it stops new fetches from being scheduled;
/// attempts already on the wire are left to finish.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// GET `url` until it succeeds, the failure is not retryable, the attempt
/// budget is spent, or the run is aborted. Every attempt hits the same URL.
pub async fn fetch_with_retry<F: Fetch>(
    fetcher: &F,
    url: &str,
    policy: &RetryPolicy,
    abort: &AbortHandle,
) -> Result<Bytes, FetchError> {
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match fetcher.get(url).await {
            Ok(body) => {
                info!(
                    url,
                    attempts = attempt,
                    bytes = body.len(),
                    "fetched in {:.2}s",
                    start.elapsed().as_secs_f64()
                );
                return Ok(body);
            }
            Err(e) => {
                let exhausted = attempt >= policy.max_attempts.max(1);
                if !e.is_retryable() || exhausted || abort.is_aborted() {
                    warn!(
                        url,
                        attempts = attempt,
                        error = %e,
                        "giving up after {:.2}s",
                        start.elapsed().as_secs_f64()
                    );
                    return Err(FetchError {
                        url: url.to_string(),
                        attempts: attempt,
                        last: e,
                    });
                }

                let wait = policy.delay_after(attempt);
                warn!(
                    url,
                    "fetch failed (attempt {}/{}): {}, retrying in {:.1}s",
                    attempt,
                    policy.max_attempts,
                    e,
                    wait.as_secs_f64()
                );
                tokio::time::sleep(wait).await;
                debug!(url, attempt = attempt + 1, "retrying");
            }
        }
    }
}
