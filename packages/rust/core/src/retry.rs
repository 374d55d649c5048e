//! Fixed-delay retry for remote mutations.
//!
//! Only throttling is retried. Every other failure surfaces on the first
//! attempt. Running out of attempts is not an error: the caller gets
//! `Ok(None)` and treats the work as "did not complete this run".

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use kbmirror_shared::{Result, RetryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            wait,
        }
    }

    /// No delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Run `op` until it succeeds, fails with a non-throttling error, or the
    /// attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => return Ok(Some(value)),
                Err(e) if e.is_rate_limited() => {
                    warn!(operation, attempt, max_attempts = self.max_attempts, "rate limited");
                    if attempt < self.max_attempts && !self.wait.is_zero() {
                        tokio::time::sleep(self.wait).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        warn!(operation, attempts = self.max_attempts, "retries exhausted");
        Ok(None)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use kbmirror_shared::KbMirrorError;

    #[tokio::test]
    async fn succeeds_after_throttling() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::immediate(5);
        let result = policy
            .run("op", || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(KbMirrorError::rate_limited("op"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, Some(3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn exhaustion_yields_none() {
        let calls = Cell::new(0);
        let result: Option<()> = RetryPolicy::immediate(4)
            .run("op", || {
                calls.set(calls.get() + 1);
                async { Err(KbMirrorError::rate_limited("op")) }
            })
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let err = RetryPolicy::immediate(5)
            .run("op", || {
                calls.set(calls.get() + 1);
                async { Err::<(), _>(KbMirrorError::Network("reset".into())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KbMirrorError::Network(_)));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_attempts() {
        let start = tokio::time::Instant::now();
        let _ = RetryPolicy::new(3, Duration::from_secs(10))
            .run("op", || async { Err::<(), _>(KbMirrorError::rate_limited("op")) })
            .await;
        // Two waits: after attempts 1 and 2, none after the last.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(20) && elapsed < Duration::from_secs(21));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
    }
}
