// Rate-limit aware retry: wait out the quota window, then ask again
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::github::{GitHubError, Result};

/// Retry configuration for rate-limited requests
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// How many times we are willing to sleep through a rate-limit window
    pub max_waits: u32,
    /// Extra time added after the reset instant, GitHub's clock and ours rarely agree
    pub buffer: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_waits: 3,
            buffer: Duration::from_secs(5),
        }
    }
}

/// Execute a request, sleeping until the quota resets whenever GitHub says no
///
/// Only `GitHubError::RateLimited` triggers a retry. Everything else is
/// handed straight back to the caller, one failed repo fetch is not worth
/// hammering the API over.
pub async fn with_rate_limit_retry<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut waits = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if waits > 0 {
                    debug!("Request succeeded after {} rate-limit waits", waits);
                }
                return Ok(result);
            }
            Err(GitHubError::RateLimited { reset }) => {
                waits += 1;

                if waits > config.max_waits {
                    warn!("Still rate limited after {} waits, giving up", config.max_waits);
                    return Err(GitHubError::RateLimited { reset });
                }

                let wait = wait_duration(reset, Utc::now(), config.buffer);
                match reset {
                    Some(at) => info!(
                        "Rate limit exceeded, waiting {}s until reset at {}",
                        wait.as_secs(),
                        at.to_rfc3339()
                    ),
                    None => info!("Rate limit exceeded, waiting {}s", wait.as_secs()),
                }

                sleep(wait).await;
                info!("Retrying after rate limit reset...");
            }
            Err(err) => return Err(err),
        }
    }
}

/// How long to sleep for a rate limit that resets at `reset`
///
/// A reset instant in the past (or unknown) still gets the buffer.
pub fn wait_duration(reset: Option<DateTime<Utc>>, now: DateTime<Utc>, buffer: Duration) -> Duration {
    let until_reset = reset
        .and_then(|at| (at - now).to_std().ok())
        .unwrap_or(Duration::ZERO);
    until_reset + buffer
}

/// Check if an HTTP status code can mean "slow down"
pub fn is_rate_limit_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}
