//! Retry for provider calls.
//!
//! Rate-limit errors wait a fixed backoff (the provider's quota window);
//! other transient errors back off exponentially.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;

/// Exponent cap: waits stop growing at 2^10s (about 17 minutes)
const MAX_BACKOFF_EXP: u32 = 10;

/// Exponential backoff: 2^attempt seconds (2s, 4s, 8s, ...), capped
pub const fn backoff_duration(attempt: u32) -> Duration {
    let exp = if attempt > MAX_BACKOFF_EXP {
        MAX_BACKOFF_EXP
    } else {
        attempt
    };
    Duration::from_secs(1 << exp)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Fixed wait after a quota / rate-limit error
    pub quota_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            quota_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn wait_for(&self, err: &ProviderError, attempt: u32) -> Duration {
        if err.is_quota() {
            self.quota_backoff
        } else {
            backoff_duration(attempt)
        }
    }
}

/// Retry a provider operation while its error is retryable.
///
/// Returns the first success, the first non-retryable error, or the last
/// error once attempts run out. A cancelled token ends the wait early and
/// returns the pending error.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt_fn: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt + 1 < policy.max_attempts && e.is_retryable() => {
                attempt += 1;
                let wait = policy.wait_for(&e, attempt);
                log::warn!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying in {}s",
                    policy.max_attempts,
                    wait.as_secs()
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(e),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}
