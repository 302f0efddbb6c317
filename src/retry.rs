//! Bounded exponential-backoff retry

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy: up to `max_attempts` invocations, sleeping between them
/// with a delay that starts at `initial_delay` and doubles each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_attempts,
        }
    }

    /// Delay slept after the given (0-indexed) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `operation` until it stops asking for a retry.
    ///
    /// `operation` resolves to `true` when it needs another attempt. Returns
    /// `true` if it eventually succeeded, `false` if attempts ran out.
    pub async fn run<F, Fut>(&self, mut operation: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut attempt = 0;
        loop {
            if !operation().await {
                return true;
            }
            attempt += 1;
            if attempt >= self.max_attempts {
                debug!(attempts = attempt, "Retry attempts exhausted");
                return false;
            }

            let delay = self.delay_for_attempt(attempt - 1);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying after delay");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_doubling_delay_until_success() {
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let policy = RetryPolicy::new(Duration::from_millis(100), 5);

        let recorded = calls.clone();
        let succeeded = policy
            .run(|| {
                let recorded = recorded.clone();
                async move {
                    let mut calls = recorded.lock();
                    calls.push(Instant::now());
                    calls.len() < 3
                }
            })
            .await;

        assert!(succeeded);
        let calls = calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_millis(100));
        assert_eq!(calls[2] - calls[1], Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_max_attempts() {
        let calls = Arc::new(Mutex::new(0u32));
        let policy = RetryPolicy::new(Duration::from_millis(10), 4);

        let counter = calls.clone();
        let succeeded = policy
            .run(|| {
                let counter = counter.clone();
                async move {
                    *counter.lock() += 1;
                    true
                }
            })
            .await;

        assert!(!succeeded);
        assert_eq!(*calls.lock(), 4);
    }

    #[tokio::test]
    async fn test_first_success_does_not_sleep() {
        let policy = RetryPolicy::new(Duration::from_secs(3600), 5);
        assert!(policy.run(|| async { false }).await);
    }

    #[test]
    fn test_delay_for_attempt_doubles() {
        let policy = RetryPolicy::new(Duration::from_millis(50), 5);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }
}
