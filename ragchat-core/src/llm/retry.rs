//! Retry policy for the HTTP clients
//!
//! Exponential backoff with jitter for transient service failures. Both the
//! completion provider and the search client share this policy.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: usize,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Multiplier applied per attempt
    pub backoff_multiplier: f64,

    /// Add up to 25% random jitter to each delay
    pub jitter: bool,

    /// HTTP status codes worth retrying
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            retryable_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after the given failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let clamped = base.min(self.max_delay.as_millis() as f64);

        let millis = if self.jitter {
            clamped + clamped * 0.25 * jitter_fraction()
        } else {
            clamped
        };

        Duration::from_millis(millis as u64)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }
}

/// Pseudo-random value in [0, 1) from the clock's sub-second nanos
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1_000_000) / 1_000_000.0
}

/// Outcome of one failed attempt
#[derive(Debug)]
pub enum AttemptError<E> {
    /// Worth trying again (rate limit, 5xx, transport failure)
    Transient(E),
    /// Retrying would not help
    Permanent(E),
}

impl<E> AttemptError<E> {
    pub fn into_inner(self) -> E {
        match self {
            AttemptError::Transient(e) | AttemptError::Permanent(e) => e,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Permanent(e)) => return Err(e),
            Err(AttemptError::Transient(e)) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(e);
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.is_retryable_status(429));
        assert!(policy.is_retryable_status(503));
        assert!(!policy.is_retryable_status(400));
        assert!(!policy.is_retryable_status(401));
    }

    #[test]
    fn test_exponential_delays_without_jitter() {
        let policy = RetryPolicy::default().with_jitter(false);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy::default()
            .with_jitter(false)
            .with_max_delay(Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy::default();
        let delay = policy.delay_for_attempt(0);
        assert!(delay >= Duration::from_millis(500));
        assert!(delay <= Duration::from_millis(625));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::default().with_initial_delay(Duration::from_millis(1));

        let result: Result<&str, String> = with_retry(&policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AttemptError::Transient("busy".to_string()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::default().with_initial_delay(Duration::from_millis(1));

        let result: Result<(), String> = with_retry(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Permanent("bad request".to_string())) }
        })
        .await;

        assert_eq!(result.unwrap_err(), "bad request");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::default()
            .with_max_attempts(2)
            .with_initial_delay(Duration::from_millis(1));

        let result: Result<(), String> = with_retry(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Transient("still busy".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_policy_deserializes_humantime() {
        let policy: RetryPolicy = serde_json::from_value(serde_json::json!({
            "max_attempts": 5,
            "initial_delay": "250ms",
            "max_delay": "10s"
        }))
        .unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert!(policy.jitter);
    }
}
