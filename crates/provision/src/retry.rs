//! Retry logic with exponential backoff for transient provider errors.

use crate::error::ProviderError;
use std::thread;
use std::time::Duration;

/// Retry configuration for provider calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a retry config with custom settings.
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

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called when an operation is being retried.
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration);
}

/// Execute a provider call with retry logic.
///
/// Retries the operation if it returns a retryable error, using exponential
/// backoff between attempts. Non-retryable errors are returned immediately;
/// a retryable error on the final attempt is returned as-is.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let mut last_error: Option<ProviderError> = None;

    for attempt in 0..config.max_attempts {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }

                if attempt + 1 >= config.max_attempts {
                    last_error = Some(e);
                    break;
                }

                let delay = config.delay_for_attempt(attempt);
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, config.max_attempts, &e, delay);
                }
                log::debug!(
                    "attempt {}/{} failed ({}), retrying in {:?}",
                    attempt + 1,
                    config.max_attempts,
                    e,
                    delay
                );

                thread::sleep(delay);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ProviderError::Other("retry exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn success_first_try() {
        let result = with_retry(&RetryConfig::no_retry(), None, || Ok::<_, ProviderError>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn non_retryable_error_returns_immediately() {
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = with_retry(&fast_config(5), None, || {
            counter.set(counter.get() + 1);
            Err(ProviderError::InvalidInput {
                message: "bad".into(),
            })
        });

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn eventual_success_within_budget() {
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();

        let result = with_retry(&fast_config(3), None, || {
            let current = counter.get();
            counter.set(current + 1);
            if current < 2 {
                Err(ProviderError::Throttled {
                    message: "slow down".into(),
                })
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn all_attempts_exhausted() {
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = with_retry(&fast_config(3), None, || {
            counter.set(counter.get() + 1);
            Err(ProviderError::Timeout { seconds: 1 })
        });

        assert!(result.is_err());
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn callback_sees_every_retry() {
        struct Counting(Cell<u32>);

        impl RetryCallback for Counting {
            fn on_retry(&self, attempt: u32, max_attempts: u32, _: &ProviderError, _: Duration) {
                assert!(attempt < max_attempts);
                self.0.set(self.0.get() + 1);
            }
        }

        let watcher = Counting(Cell::new(0));
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();

        let result = with_retry(&fast_config(3), Some(&watcher), || {
            let current = counter.get();
            counter.set(current + 1);
            if current < 2 {
                Err(ProviderError::Throttled {
                    message: "slow down".into(),
                })
            } else {
                Ok("done")
            }
        });

        assert_eq!(result.unwrap(), "done");
        // Two failures, each announced before backing off.
        assert_eq!(watcher.0.get(), 2);
    }

    #[test]
    fn backoff_delays_grow_and_cap() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(30),
            ..RetryConfig::new(5, Duration::from_secs(10), 2.0)
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(20));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(30));
    }
}
