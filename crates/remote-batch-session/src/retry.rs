//! Bounded retry with exponential backoff for transport-class failures.

use std::future::Future;
use std::time::Duration;

use remote_batch_core::{BatchConfig, TransportError};

use crate::manager::ManagerError;

/// Classifies errors the retry controller may try again.
pub trait Retryable {
    /// Whether another attempt is permitted for this error.
    fn is_retryable(&self) -> bool;
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        TransportError::is_retryable(self)
    }
}

impl Retryable for ManagerError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            // Busy is a caller sequencing bug, not a transient condition.
            Self::SessionBusy(_) => false,
        }
    }
}

/// Bounded retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Ceiling for the backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Derive the policy from the engine configuration.
    #[must_use]
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: config.retry_backoff,
            ..Self::default()
        }
    }

    /// Backoff delay after the given (1-based) failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run an operation, retrying retryable errors up to the bound.
    ///
    /// # Errors
    /// Returns the last error once attempts are exhausted, or the first
    /// non-retryable error immediately.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "{what} failed, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "{what} failed, giving up");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TransportError> = fast_policy(3)
            .run("op", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TransportError::Unavailable("refused".into()))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TransportError> = fast_policy(3)
            .run("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Unavailable("refused".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TransportError> = fast_policy(3)
            .run("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::AuthRejected("bad key".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }
}
