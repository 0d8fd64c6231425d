//! Retry with exponential backoff for transient provider failures.
//!
//! Eligibility is decided by the provider-reported error class
//! (`rate_limit`, `timeout`, `transient`); everything else surfaces
//! immediately. Delay = `base * factor^attempt`, jittered symmetrically.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use pk_domain::config::RetryPolicy;
use pk_domain::Result;

/// Backoff delay for the given 0-based attempt, jitter applied.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.base_delay_ms as f64 * policy.factor.powi(attempt as i32);
    let jitter_range = base * policy.jitter;
    let jitter = if jitter_range > 0.0 {
        rand::thread_rng().gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };
    Duration::from_millis((base + jitter).max(0.0) as u64)
}

/// Run `op` until it succeeds, fails with a non-retryable error, or exhausts
/// `policy.max_attempts`. The closure receives the attempt index (0-based).
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = backoff_delay(policy, attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying provider call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pk_domain::{Error, ErrorClass};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            factor: 1.0,
            jitter: 0.0,
        }
    }

    fn transient() -> Error {
        Error::Provider {
            provider: "p".into(),
            class: ErrorClass::Transient,
            message: "503".into(),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_policy(3), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(&fast_policy(3), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(&fast_policy(5), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(Error::Provider {
                    provider: "p".into(),
                    class: ErrorClass::Permanent,
                    message: "400".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 500,
            factor: 2.0,
            jitter: 0.0,
        };
        assert_eq!(backoff_delay(&policy, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(2000));
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 500,
            factor: 2.0,
            jitter: 0.2,
        };
        for _ in 0..100 {
            let d = backoff_delay(&policy, 0).as_millis() as f64;
            assert!((400.0..=600.0).contains(&d), "delay {d} out of band");
        }
    }
}
