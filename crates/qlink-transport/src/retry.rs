//! Retry and reconnect backoff
//!
//! Two policies live here:
//! - [`RetryPolicy`] drives a single command exchange: refused connections
//!   are retried with `base * 2^attempt` plus up to 50% jitter.
//! - [`ReconnectBackoff`] paces the monitoring connection: starts at the
//!   base, doubles to a ceiling, adds up to 25% jitter, resets on success.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, TransportError};

/// Exponent cap so `2^attempt` cannot overflow
const MAX_EXPONENT: u32 = 16;

/// Retry policy for refused connections
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total connection attempts allowed (at least one is always made)
    pub max_attempts: u32,
    /// Base delay before the first retry
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self { max_attempts, base }
    }

    /// Backoff before retrying after failed attempt `attempt` (0-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(1u32 << attempt.min(MAX_EXPONENT))
    }

    /// Backoff plus uniform jitter in `[0, backoff / 2]`
    pub fn next_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let backoff = self.backoff(attempt);
        backoff + backoff.mul_f64(rng.gen_range(0.0..=0.5))
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::thread_rng())
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last = String::new();

        for attempt in 0..attempts {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    last = e.to_string();
                    if attempt + 1 < attempts {
                        let delay = self.next_delay(attempt);
                        warn!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Controller refused connection, retrying: {}",
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(TransportError::MaxRetriesExceeded { attempts, last })
    }
}

/// Jittered exponential backoff for reconnect loops
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay that the next call to [`next_delay`](Self::next_delay) starts from
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Current delay plus up to 25% jitter; doubles the delay for next time
    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let delay = self.current + self.current.mul_f64(rng.gen_range(0.0..=0.25));
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    /// Back to the base after a successful reconnect
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn refused() -> TransportError {
        TransportError::ConnectionRefused("Connection refused (os error 111)".into())
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..5 {
            let backoff = policy.backoff(attempt);
            for _ in 0..50 {
                let delay = policy.next_delay_with(attempt, &mut rng);
                assert!(delay >= backoff);
                assert!(delay <= backoff + backoff / 2);
            }
        }
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1));
        let _ = policy.next_delay(99);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refusals_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(4, Duration::from_millis(1));

        let counter = calls.clone();
        let result = policy
            .run(|_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(refused())
                    } else {
                        Ok("OK".to_string())
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "OK");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let counter = calls.clone();
        let result: Result<String> = policy
            .run(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(refused())
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(TransportError::MaxRetriesExceeded { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_fail_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let counter = calls.clone();
        let result: Result<String> = policy
            .run(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TransportError::ConnectionFailed("No route to host".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reconnect_backoff_caps_and_resets() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let mut rng = StdRng::seed_from_u64(42);

        let first = backoff.next_delay_with(&mut rng);
        assert!(first >= Duration::from_secs(1));
        assert!(first <= Duration::from_millis(1250));

        for _ in 0..10 {
            let delay = backoff.next_delay_with(&mut rng);
            assert!(delay <= Duration::from_millis(37_500));
        }
        assert_eq!(backoff.current(), Duration::from_secs(30));

        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }
}
