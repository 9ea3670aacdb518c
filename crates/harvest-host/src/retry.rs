use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use harvest_core::error::HarvestError;

use crate::http::DEFAULT_RETRY_AFTER_SECS;

/// How hard a single platform call is retried before its error is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts for network errors and 5xx, including the first.
    pub transient_attempts: u32,
    /// First backoff delay; doubles per attempt.
    pub base_delay: Duration,
    /// Rate-limit waits one call may sit through before giving up.
    pub rate_limit_budget: u32,
    /// Upper bound for a single rate-limit wait.
    pub max_rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient_attempts: 3,
            base_delay: Duration::from_millis(500),
            rate_limit_budget: 3,
            max_rate_limit_wait: Duration::from_secs(15 * 60),
        }
    }
}

/// Run `op`, retrying transient errors with exponential backoff and sitting
/// out rate limits within the budget. `target` names the call in log lines.
///
/// Once the budget is spent the rate-limit error itself is returned, so the
/// caller can tell a resumable stop from a failure.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, target: &str, mut op: F) -> Result<T, HarvestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HarvestError>>,
{
    let mut attempts = 1u32;
    let mut waits = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_rate_limited() && waits < policy.rate_limit_budget => {
                waits += 1;
                let delay = e
                    .retry_after()
                    .unwrap_or(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS))
                    .min(policy.max_rate_limit_wait);
                warn!(
                    target_call = target,
                    wait_secs = delay.as_secs(),
                    wait = waits,
                    "rate limited, waiting"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_transient() && attempts < policy.transient_attempts => {
                let delay = policy.base_delay * 2u32.saturating_pow(attempts - 1);
                debug!(
                    target_call = target,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying"
                );
                attempts += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    fn rate_limited() -> HarvestError {
        HarvestError::RateLimited {
            platform: "github".into(),
            retry_after_secs: 0,
        }
    }

    #[tokio::test]
    async fn test_transient_errors_retried_until_attempts_run_out() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&quick(), "list", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(HarvestError::ApiError {
                status: 502,
                message: "bad gateway".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_waits_then_succeeds() {
        let calls = &AtomicU32::new(0);
        let value = with_retry(&quick(), "list", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(rate_limited())
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_returns_rate_limit() {
        let policy = RetryPolicy {
            rate_limit_budget: 1,
            ..quick()
        };
        let calls = &AtomicU32::new(0);
        let err = with_retry(&policy, "list", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(rate_limited())
        })
        .await
        .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = with_retry(&quick(), "list", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(HarvestError::ApiError {
                status: 404,
                message: "missing".into(),
            })
        })
        .await
        .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
