//! Fixed-delay bounded retry for transient infrastructure failures.
//!
//! Directory creation and archive opening can fail for reasons that usually
//! clear up on their own (disk pressure, a leftover entry from a crashed job).
//! Those operations run under an explicit [`RetryPolicy`] instead of failing
//! immediately. Permission errors are never retried: they will not resolve
//! without operator intervention.

use crate::error::{LiberationError, Result};
use std::future::Future;
use std::io;
use std::time::Duration;

/// Maximum attempts and the fixed delay between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Whether an I/O failure is worth another attempt.
pub fn is_retryable(err: &io::Error) -> bool {
    err.kind() != io::ErrorKind::PermissionDenied
}

/// Run `op` under `policy`, sleeping the fixed delay between attempts.
///
/// Returns [`LiberationError::RetriesExhausted`] once attempts run out or as
/// soon as a non-retryable error is seen.
pub async fn run_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_retryable(&err) => {
                log::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation,
                    attempt,
                    policy.max_attempts,
                    policy.delay,
                    err
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(LiberationError::RetriesExhausted {
                    operation,
                    attempts: attempt,
                    source: err,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result = run_with_retry(policy, "flaky op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(io::Error::new(io::ErrorKind::Other, "disk hiccup"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let result: Result<()> = run_with_retry(policy, "doomed op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(io::Error::new(io::ErrorKind::Other, "still broken")) }
        })
        .await;

        match result {
            Err(LiberationError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected RetriesExhausted, got {:?}", other.map(|_| ())),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permission_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result: Result<()> = run_with_retry(policy, "forbidden op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(io::Error::new(io::ErrorKind::PermissionDenied, "no")) }
        })
        .await;

        assert!(matches!(
            result,
            Err(LiberationError::RetriesExhausted { attempts: 1, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
