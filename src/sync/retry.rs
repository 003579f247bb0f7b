//! Retry policy for provider calls
//!
//! Bounded exponential backoff. Throttled responses that carry a
//! `Retry-After` header wait exactly as long as the provider asked.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::ApiError;
use crate::metrics::PROVIDER_REQUESTS_TOTAL;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following failed attempt `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32, error: &ApiError) -> Duration {
        if let ApiError::Status {
            status: 429,
            retry_after: Some(seconds),
            ..
        } = error
        {
            return Duration::from_secs(*seconds);
        }

        self.initial_backoff
            .saturating_mul(self.multiplier.saturating_pow(attempt))
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of attempts
    ///
    /// The last error is returned unchanged.
    ///
    /// # Arguments
    /// * `context` - Operation name used in logs and metrics
    /// * `operation` - Produces a fresh future per attempt
    pub async fn run<T, F, Fut>(&self, context: &str, mut operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    PROVIDER_REQUESTS_TOTAL
                        .with_label_values(&[context, "success"])
                        .inc();
                    if attempt > 0 {
                        tracing::info!(operation = context, attempt = attempt + 1, "Provider call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let last_attempt = attempt + 1 >= max_attempts;
                    if !error.is_retryable() || last_attempt {
                        PROVIDER_REQUESTS_TOTAL
                            .with_label_values(&[context, "failure"])
                            .inc();
                        tracing::warn!(
                            operation = context,
                            attempts = attempt + 1,
                            retryable = error.is_retryable(),
                            error = %error,
                            "Provider call failed"
                        );
                        return Err(error);
                    }

                    PROVIDER_REQUESTS_TOTAL
                        .with_label_values(&[context, "retry"])
                        .inc();
                    let delay = self.delay_for(attempt, &error);
                    tracing::debug!(
                        operation = context,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying provider call"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Run `operation` under the default policy
pub async fn with_retry<T, F, Fut>(context: &str, operation: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    RetryPolicy::default().run(context, operation).await
}
