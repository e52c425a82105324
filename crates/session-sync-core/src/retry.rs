//! Retry with capped exponential backoff.

use auth_config_and_utils::SyncSettings;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Backoff configuration for retried operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
        }
    }
}

impl From<&SyncSettings> for RetryPolicy {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            max_retries: settings.max_fetch_retries,
            base_delay: settings.retry_base_delay(),
            max_delay: settings.retry_max_delay(),
        }
    }
}

/// The error that ended a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    pub error: E,
    /// Attempts made, including the first.
    pub attempts: u32,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `min(base * 2^retry, max)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with an error `should_retry`
    /// rejects, or the retry budget is spent.
    ///
    /// `op` receives the retry number, 0 for the first attempt.
    pub async fn attempt<T, E, F, Fut, P>(
        &self,
        mut op: F,
        should_retry: P,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut retry = 0;
        loop {
            match op(retry).await {
                Ok(value) => return Ok(value),
                Err(error) if retry < self.max_retries && should_retry(&error) => {
                    let delay = self.delay_for_retry(retry);
                    retry += 1;
                    debug!(
                        attempt = retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(RetryFailure {
                        error,
                        attempts: retry + 1,
                    })
                }
            }
        }
    }
}
