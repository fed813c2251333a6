use crate::resilience::types::SyncError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout and backoff policy for one class of remote operation.
///
/// The delay before retry `n` (1-based) is
/// `min(initial_delay * 2^(n-1), max_delay) + random(0, jitter)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Policy for resync reads: short backoff, no jitter.
    pub fn reads() -> Self {
        Self {
            max_retries: 2,
            attempt_timeout: Duration::from_secs(15),
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_millis(3000),
            jitter: Duration::ZERO,
        }
    }

    /// Policy for queued writes: longer backoff with jitter.
    pub fn writes() -> Self {
        Self {
            max_retries: 3,
            attempt_timeout: Duration::from_secs(15),
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_millis(1000),
        }
    }

    /// Deterministic part of the backoff before retry `retry_number` (1-based).
    pub fn base_delay(&self, retry_number: u32) -> Duration {
        let exponent = retry_number.saturating_sub(1).min(20);
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    pub fn delay_for(&self, retry_number: u32) -> Duration {
        let base = self.base_delay(retry_number);
        if self.jitter.is_zero() {
            return base;
        }
        let jitter_ms = (rand::random::<f64>() * self.jitter.as_millis() as f64) as u64;
        base + Duration::from_millis(jitter_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::reads()
    }
}

/// Race a future against a timer; the timer winning is a [`SyncError::Timeout`].
pub async fn with_timeout<T, Fut>(limit: Duration, future: Fut) -> Result<T, SyncError>
where
    Fut: Future<Output = Result<T, SyncError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(limit)),
    }
}

/// Timeout + exponential backoff around a single remote operation.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempt `operation` up to `max_retries + 1` times.
    ///
    /// Terminal errors (4xx, aborted, open circuit) propagate after the
    /// first attempt. Exhausting retries propagates the last error.
    pub async fn with_retries<T, F, Fut>(
        &self,
        resource: &str,
        mut operation: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut retries = 0;

        loop {
            match with_timeout(self.policy.attempt_timeout, operation()).await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(resource, retries, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !error.is_retryable() => {
                    debug!(resource, error = %error, "Terminal error, not retrying");
                    return Err(error);
                }
                Err(error) if retries >= self.policy.max_retries => {
                    warn!(
                        resource,
                        attempts = retries + 1,
                        error = %error,
                        "Retries exhausted"
                    );
                    return Err(error);
                }
                Err(error) => {
                    retries += 1;
                    let delay = self.policy.delay_for(retries);
                    warn!(
                        resource,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
