//! Retry with exponential back-off and jitter for Crossref requests.
//!
//! Only transient failures are retried: statuses listed in the configured
//! retry set, connection failures and timeouts. Anything else (404 is
//! handled before it gets here, other 4xx, malformed bodies) returns on the
//! first attempt.

use std::future::Future;
use std::time::Duration;

use crate::error::CrossrefError;

const MAX_DELAY_MS: u64 = 60_000;

/// Retry settings shared by every request a client makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub(crate) fn is_retriable(&self, err: &CrossrefError) -> bool {
        match err {
            CrossrefError::Status { status, .. } => self.retry_statuses.contains(status),
            CrossrefError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e
                        .status()
                        .is_some_and(|s| self.retry_statuses.contains(&s.as_u16()))
            }
            CrossrefError::RetriesExhausted { .. }
            | CrossrefError::Deserialize { .. }
            | CrossrefError::InvalidBaseUrl(_) => false,
        }
    }

    /// Delay before retry number `attempt` (1-based), before jitter.
    pub(crate) fn base_delay_ms(&self, attempt: u32) -> u64 {
        let computed = self
            .backoff_base_ms
            .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
        computed.min(MAX_DELAY_MS)
    }
}

/// Runs `operation` with up to `max_retries` additional attempts on
/// retryable errors.
///
/// Back-off schedule with `backoff_base_ms = 300`:
///
/// | Retry | Sleep before it            |
/// |-------|----------------------------|
/// | 1     | 300 ms × 2⁰ ± 20 % jitter |
/// | 2     | 300 ms × 2¹ ± 20 % jitter |
/// | 3     | 300 ms × 2² ± 20 % jitter |
///
/// Delay is capped at 60 s. When the last allowed attempt still fails with a
/// retryable error, [`CrossrefError::RetriesExhausted`] is returned.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, CrossrefError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CrossrefError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !policy.is_retriable(&err) {
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    return Err(CrossrefError::RetriesExhausted {
                        attempts: attempt + 1,
                        last_error: err.to_string(),
                    });
                }
                attempt += 1;
                let capped = policy.base_delay_ms(attempt);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.4 + 0.8)) as u64;
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms,
                    error = %err,
                    "Crossref transient error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base_ms: 0,
            retry_statuses: vec![429, 500, 502, 503, 504],
        }
    }

    fn status(code: u16) -> CrossrefError {
        CrossrefError::Status {
            status: code,
            url: "http://test/works".to_owned(),
        }
    }

    #[test]
    fn configured_statuses_are_retriable() {
        let p = policy(3);
        assert!(p.is_retriable(&status(429)));
        assert!(p.is_retriable(&status(503)));
        assert!(!p.is_retriable(&status(400)));
        assert!(!p.is_retriable(&status(403)));
    }

    #[test]
    fn deserialize_error_is_not_retriable() {
        let source = serde_json::from_str::<()>("invalid").unwrap_err();
        let err = CrossrefError::Deserialize {
            context: "test".to_owned(),
            source,
        };
        assert!(!policy(3).is_retriable(&err));
    }

    #[test]
    fn delay_doubles_and_caps() {
        let p = RetryPolicy {
            backoff_base_ms: 300,
            ..policy(3)
        };
        assert_eq!(p.base_delay_ms(1), 300);
        assert_eq!(p.base_delay_ms(2), 600);
        assert_eq!(p.base_delay_ms(3), 1_200);
        assert_eq!(p.base_delay_ms(12), MAX_DELAY_MS);
    }

    #[tokio::test]
    async fn succeeds_immediately_on_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&policy(3), || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, CrossrefError>(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&policy(3), || {
            let c = Arc::clone(&c);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err(status(503))
                } else {
                    Ok(99)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&policy(2), || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(status(429))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3, "one try plus two retries");
        assert!(matches!(
            result,
            Err(CrossrefError::RetriesExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&policy(3), || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(status(400))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(CrossrefError::Status { status: 400, .. })));
    }
}
