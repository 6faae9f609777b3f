//! Retry wrapper — rate-limit-aware exponential backoff with jitter.
//!
//! Wraps any [`Provider`] and retries retryable failures (rate limits,
//! network hiccups, 5xx, timeouts) with
//! `delay = min(initial * 2^attempt, max) × uniform(0.75, 1.25)`.
//! Backoff sleeps race against the cancellation token, so a trip during
//! a wait unwinds within the select latency rather than the remaining
//! delay.

use async_trait::async_trait;
use ironloop_core::{Provider, ProviderError, ProviderRequest, ProviderResponse};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Backoff tuning.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry attempts after the initial call
    pub max_attempts: u32,
    /// First backoff delay
    pub initial_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry number `attempt` (0-based), jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt.min(31) as i32);
        let base = self.initial_delay.as_secs_f64() * exp;
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_secs_f64(capped * jitter)
    }
}

/// A provider that retries a wrapped provider on retryable errors.
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            inner,
            policy,
            cancel,
        }
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ProviderError::Cancelled),
                result = self.inner.complete(request.clone()) => result,
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable provider error, backing off"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(ProviderError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
