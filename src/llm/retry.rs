use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use opentelemetry::KeyValue;

use crate::telemetry::metrics::GEN_AI_RETRY_COUNT;

/// Bounded retry with exponential backoff and 25% jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before the attempt following `attempt` (zero-based), without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        let quarter = base.as_millis() as u64 / 4;
        if quarter == 0 {
            return base;
        }
        // 25% jitter to avoid thundering herd
        base + Duration::from_millis(fastrand::u64(0..=quarter))
    }

    /// Runs `op` until it succeeds or `max_attempts` is reached, returning
    /// the last error. `op` receives the zero-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let is_last = attempt + 1 >= max_attempts;
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        operation = label,
                        error = %err,
                        "attempt failed{}",
                        if is_last { "" } else { ", retrying" }
                    );

                    if is_last {
                        return Err(err);
                    }

                    GEN_AI_RETRY_COUNT.add(1, &[KeyValue::new("operation", label.to_string())]);
                    let delay = self.backoff_with_jitter(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_backoff(0), Duration::from_secs(1));
        assert_eq!(policy.base_backoff(1), Duration::from_secs(2));
        assert_eq!(policy.base_backoff(2), Duration::from_secs(4));
        assert_eq!(policy.base_backoff(10), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_within_quarter() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.backoff_with_jitter(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2500));
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = RetryPolicy::immediate(3)
            .run("test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(format!("failure {attempt}"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = RetryPolicy::immediate(2)
            .run("test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("failure {attempt}")) }
            })
            .await;

        assert_eq!(result, Err("failure 1".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = tokio_test::block_on(RetryPolicy::immediate(0).run(
            "test",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("nope".to_string()) }
            },
        ));
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
