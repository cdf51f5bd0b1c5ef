//! Retry policy: decides backoff delays.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::SpindleResult;

/// Backoff for failed task attempts.
///
/// `delay = base_delay * 2^retry_count`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before the next attempt.
    ///
    /// # Arguments
    /// * `retry_count` - Failures recorded before the attempt that just failed
    ///   (0 for the first failure).
    ///
    /// Example with base_delay=2s:
    /// - retry_count 0: 2s
    /// - retry_count 1: 4s
    /// - retry_count 2: 8s
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60 * 60),
        }
    }
}

/// Run `f` until it succeeds, retrying transient (`StoreUnavailable`) failures
/// up to `max_retries` times with exponential backoff from `base_delay`.
/// Non-transient errors return immediately.
pub async fn retry_transient<F, Fut, T>(
    max_retries: u32,
    base_delay: Duration,
    mut f: F,
) -> SpindleResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SpindleResult<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                let delay = base_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
                warn!(
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient store error, retrying"
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpindleError;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[rstest]
    #[case(0, 2)]
    #[case(1, 4)]
    #[case(2, 8)]
    #[case(5, 64)]
    #[case(10, 60)] // 2048s is capped
    #[case(40, 60)] // overflow is capped
    fn exponential_backoff_with_cap(#[case] retry_count: u32, #[case] secs: u64) {
        let policy = RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(60));
        assert_eq!(policy.next_delay(retry_count), Duration::from_secs(secs));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(3, Duration::from_millis(10), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SpindleError::StoreUnavailable("down".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: SpindleResult<()> = retry_transient(2, Duration::from_millis(10), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SpindleError::StoreUnavailable("down".into()))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: SpindleResult<()> = retry_transient(5, Duration::from_millis(10), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SpindleError::InvalidOption("bad".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
