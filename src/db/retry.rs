//! Fixed-delay retry for pool acquisition.

use crate::config::{RetryObserver, RetryPolicy};
use crate::error::{DbError, DbResult};
use std::future::Future;
use tracing::warn;

/// Run `operation` up to `policy.attempts` times, sleeping `policy.delay`
/// between failures.
///
/// Each failure is handed to `observer`, or logged when none is set. When the
/// budget runs out the last error is wrapped in `DbError::PoolUnavailable`.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    observer: Option<&RetryObserver>,
    operation: &str,
    mut f: F,
) -> DbResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                match observer {
                    Some(observe) => observe(attempt, &e),
                    None => warn!(
                        operation = %operation,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Attempt failed"
                    ),
                }
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    let message = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| format!("{operation} failed"));
    Err(DbError::pool_unavailable(attempts, message))
}
