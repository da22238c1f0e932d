use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::config::RetryConfig;

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Bounded retries with exponential backoff and a deadline per attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
        attempt_timeout_ms: u64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
            attempt_timeout: Duration::from_millis(attempt_timeout_ms),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            config.initial_backoff_ms,
            config.max_backoff_ms,
            config.attempt_timeout_ms,
        )
    }

    /// A single attempt, still bounded by `attempt_timeout_ms`.
    pub fn no_retry(attempt_timeout_ms: u64) -> Self {
        Self::new(0, 0, 0, attempt_timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Run `f` until it succeeds, retrying failures and timeouts alike.
    pub async fn retry<F, Fut, T>(&self, operation_name: &str, mut f: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let outcome = match timeout(self.attempt_timeout, f()).await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(e)) => Err(RetryError::Failed(e)),
                Err(_) => Err(RetryError::TimedOut(self.attempt_timeout)),
            };

            match outcome {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Operation failed after max retries"
                        );
                        return Err(e);
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis(),
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
