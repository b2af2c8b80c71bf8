use crate::error::SourceError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Capped exponential backoff applied uniformly to every provider call.
///
/// `max_retries` counts retries after the first call, so a policy with
/// `max_retries = 2` makes at most 3 calls. Delays are
/// `base_delay * 2^(retry - 1)`: base, 2×base, 4×base, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_retries: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts
    /// or `cancel` fires. `op` receives the 1-based attempt number.
    ///
    /// On exhaustion the last transient error is returned.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, SourceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SourceError::Cancelled),
                result = op(attempt) => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(SourceError::Transient(reason)) if attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{}: {}, retrying in {}ms (attempt {}/{})",
                        label,
                        reason,
                        delay.as_millis(),
                        attempt,
                        max_attempts
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(SourceError::Transient(reason)) => {
                    tracing::warn!("{}: giving up after {} attempts: {}", label, attempt, reason);
                    return Err(SourceError::Transient(reason));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), max_retries)
    }

    /// Fails transiently `failures` times, then succeeds
    async fn flaky(calls: Arc<AtomicU32>, failures: u32) -> Result<&'static str, SourceError> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= failures {
            Err(SourceError::Transient("HTTP 429".to_string()))
        } else {
            Ok("payload")
        }
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(Duration::from_millis(100), 5);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.max_attempts(), 6);
    }

    #[tokio::test]
    async fn test_n_transient_failures_then_success() {
        for failures in 0..=2 {
            let calls = Arc::new(AtomicU32::new(0));
            let result = fast_policy(2)
                .run("test", &CancellationToken::new(), |_| flaky(calls.clone(), failures))
                .await;
            assert_eq!(result, Ok("payload"));
            assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
        }
    }

    #[tokio::test]
    async fn test_exhaustion_makes_no_extra_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = fast_policy(2)
            .run("test", &CancellationToken::new(), |_| flaky(calls.clone(), 3))
            .await;
        assert!(matches!(result, Err(SourceError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), SourceError> = fast_policy(5)
            .run("test", &CancellationToken::new(), |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SourceError::Permanent("HTTP 401".to_string()))
                }
            })
            .await;
        assert!(matches!(result, Err(SourceError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let policy = RetryPolicy::new(Duration::from_secs(60), 3);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = policy.run("test", &cancel, |_| flaky(calls.clone(), 10)).await;
        assert_eq!(result, Err(SourceError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_call() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let result = fast_policy(2).run("test", &cancel, |_| flaky(calls.clone(), 0)).await;
        assert_eq!(result, Err(SourceError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
