//! Retry logic with exponential backoff for transient provider errors.

use std::thread;
use std::time::Duration;

use crate::error::ProviderError;
use crate::provider::ProviderResult;

/// Retry configuration for provider calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Outcome of a retried call: the result plus how many attempts it took
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: ProviderResult<T>,
    pub attempts: u32,
}

/// Execute a provider call with retry logic.
///
/// Retries only errors whose category is retryable, sleeping with
/// exponential backoff in between. `label` is used for log lines.
pub fn with_retry<T, F>(policy: &RetryPolicy, label: &str, mut operation: F) -> Attempted<T>
where
    F: FnMut() -> ProviderResult<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation() {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                };
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt - 1);
                log::warn!(
                    "{label}: attempt {attempt}/{max_attempts} failed: {e}. Retrying in {:.1}s...",
                    delay.as_secs_f64()
                );
                thread::sleep(delay);
            }
        }
    }
}

/// Convenience for callers that only need the result
pub fn retry_result<T, F>(policy: &RetryPolicy, label: &str, operation: F) -> Result<T, ProviderError>
where
    F: FnMut() -> ProviderResult<T>,
{
    with_retry(policy, label, operation).result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_success_first_try() {
        let out = with_retry(&RetryPolicy::no_retry(), "op", || Ok::<_, ProviderError>(42));
        assert_eq!(out.result.unwrap(), 42);
        assert_eq!(out.attempts, 1);
    }

    #[test]
    fn test_non_retryable_error_returns_immediately() {
        let attempts = Cell::new(0);
        let out: Attempted<()> = with_retry(&fast(5), "op", || {
            attempts.set(attempts.get() + 1);
            Err(ProviderError::rejected("quota exceeded"))
        });
        assert!(out.result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_eventual_success() {
        let attempts = Cell::new(0);
        let out = with_retry(&fast(3), "op", || {
            let current = attempts.get();
            attempts.set(current + 1);
            if current < 2 {
                Err(ProviderError::transient("throttled"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(out.result.unwrap(), 7);
        assert_eq!(out.attempts, 3);
    }

    #[test]
    fn test_all_attempts_fail() {
        let attempts = Cell::new(0);
        let result: ProviderResult<()> = retry_result(&fast(3), "op", || {
            attempts.set(attempts.get() + 1);
            Err(ProviderError::transient("connection reset"))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let out = with_retry(&fast(0), "op", || Ok::<_, ProviderError>(()));
        assert_eq!(out.attempts, 1);
    }

    #[test]
    fn test_delay_for_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2), 2.0);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::new(5, Duration::from_secs(2), 2.0)
        };
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
    }
}
