/// Retry policy for upstream calls
///
/// Failures are classified through [`AppError::is_retryable`]: transient I/O
/// errors are retried with backoff, terminal ones (e.g. an invalid account id)
/// are returned immediately.
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Delay schedule between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    /// `step * attempt`
    Linear { step: Duration },
    /// `initial * multiplier^(attempt - 1)`, capped at `max`
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay after the given (1-based) failed attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Linear { step } => step.saturating_mul(attempt),
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = attempt.saturating_sub(1) as i32;
                let millis = initial.as_millis() as f64 * multiplier.powi(exponent);
                Duration::from_millis(millis.min(max.as_millis() as f64) as u64)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Randomise each delay by ±30%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Backoff::Linear {
                step: Duration::from_secs(2),
            },
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed(Duration::ZERO),
            jitter: false,
        }
    }

    /// Runs `operation` until it succeeds, fails terminally, or attempts run out
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(operation = operation_name, error = %e, "Terminal upstream error, not retrying");
                    return Err(e);
                }
                Err(e) if attempt >= self.max_attempts => {
                    tracing::error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %e,
                        "All upstream attempts failed"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.jittered(self.backoff.delay(attempt));
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Upstream attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
        Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
    }
}

/// Convenience for callers that only have an error message
pub fn upstream_error(message: impl Into<String>) -> AppError {
    AppError::UpstreamUnavailable(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Backoff::Fixed(Duration::from_millis(1)),
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_schedules() {
        let linear = Backoff::Linear {
            step: Duration::from_secs(2),
        };
        assert_eq!(linear.delay(1), Duration::from_secs(2));
        assert_eq!(linear.delay(3), Duration::from_secs(6));

        let exponential = Backoff::Exponential {
            initial: Duration::from_millis(100),
            multiplier: 2.0,
            max: Duration::from_millis(500),
        };
        assert_eq!(exponential.delay(1), Duration::from_millis(100));
        assert_eq!(exponential.delay(3), Duration::from_millis(400));
        assert_eq!(exponential.delay(5), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = fast_policy(5)
            .run("owned_games", move || {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(upstream_error("503"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: AppResult<()> = fast_policy(5)
            .run("owned_games", move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::InvalidInput("invalid account id".into())) }
            })
            .await;

        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: AppResult<()> = fast_policy(3)
            .run("owned_games", move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(upstream_error("connection reset")) }
            })
            .await;

        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_policy() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let _: AppResult<()> = RetryPolicy::no_retry()
            .run("owned_games", move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(upstream_error("down")) }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
