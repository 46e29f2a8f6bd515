//! Bounded exponential backoff for calls to external services.

use std::fmt::Display;
use std::time::Duration;

use lib::core::config::RetryConfig;
use tracing::warn;

/// An error which may go away if the call is made again.
pub trait Retryable {
    /// Whether another attempt could succeed.
    fn is_retryable(&self) -> bool;
}

/// How often, and how patiently, to retry a failing external call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        let RetryConfig {
            attempts,
            initial_backoff_ms,
            max_backoff_ms,
        } = config;
        Self {
            attempts,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    const BACKOFF_EXPONENT: u32 = 2;

    /// Create a new policy with no delay between attempts.
    pub fn new_without_delay(attempts: u32) -> Self {
        Self {
            attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// The total number of attempts, including the first one. Always at
    /// least one.
    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// The delays slept between consecutive attempts, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut delay = self.initial_backoff;
        (1..self.attempts()).map(move |_| {
            let current = delay.min(self.max_backoff);
            delay = delay.saturating_mul(Self::BACKOFF_EXPONENT);
            current
        })
    }

    /// Call `f` until it succeeds, fails with an error which is not
    /// [`Retryable`], or the attempts run out. The last error is returned on
    /// exhaustion.
    pub fn retry<T, E: Display + Retryable>(
        &self,
        operation: &str,
        f: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        self.retry_with_sleep(operation, f, std::thread::sleep)
    }

    /// Like [`RetryPolicy::retry`], but with a custom `sleep` function.
    pub fn retry_with_sleep<T, E: Display + Retryable>(
        &self,
        operation: &str,
        mut f: impl FnMut() -> Result<T, E>,
        mut sleep: impl FnMut(Duration),
    ) -> Result<T, E> {
        let mut delays = self.delays();
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => {
                    warn!(%operation, attempt, %err, "External call failed permanently");
                    return Err(err);
                }
                Err(err) => match delays.next() {
                    Some(delay) => {
                        warn!(
                            %operation,
                            attempt,
                            attempts = self.attempts(),
                            ?delay,
                            %err,
                            "External call failed, retrying"
                        );
                        sleep(delay);
                        attempt += 1;
                    }
                    None => {
                        warn!(%operation, attempt, %err, "External call failed, giving up");
                        return Err(err);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Retryable for String {
        fn is_retryable(&self) -> bool {
            !self.starts_with("permanent")
        }
    }

    #[test]
    fn test_default_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 3);
        assert_eq!(
            policy.delays().collect::<Vec<_>>(),
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[test]
    fn test_delays_are_capped() {
        let policy = RetryPolicy::from(RetryConfig {
            attempts: 7,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        });
        assert_eq!(
            policy
                .delays()
                .map(|delay| delay.as_millis())
                .collect::<Vec<_>>(),
            vec![1000, 2000, 4000, 5000, 5000, 5000]
        );
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new_without_delay(0);
        let mut calls = 0;
        let result: Result<(), String> = policy.retry("op", || {
            calls += 1;
            Err("nope".to_string())
        });
        assert_eq!(result, Err("nope".to_string()));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::default();
        let mut slept = Vec::new();
        let mut calls = 0;
        let result: Result<u32, String> = policy.retry_with_sleep(
            "op",
            || {
                calls += 1;
                if calls < 3 {
                    Err(format!("failure {calls}"))
                } else {
                    Ok(calls)
                }
            },
            |delay| slept.push(delay),
        );
        assert_eq!(result, Ok(3));
        assert_eq!(
            slept,
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[test]
    fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<(), String> = policy.retry_with_sleep(
            "op",
            || {
                calls += 1;
                Err(format!("failure {calls}"))
            },
            |_| {},
        );
        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let policy = RetryPolicy::default();
        let mut slept = Vec::new();
        let mut calls = 0;
        let result: Result<(), String> = policy.retry_with_sleep(
            "op",
            || {
                calls += 1;
                Err("permanent: no token".to_string())
            },
            |delay| slept.push(delay),
        );
        assert_eq!(result, Err("permanent: no token".to_string()));
        assert_eq!(calls, 1);
        assert!(slept.is_empty());
    }
}
