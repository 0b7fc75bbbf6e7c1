//! Bounded retry and polling driven by a [`RetryPolicy`].

use std::fmt::Display;
use std::future::Future;

use crate::config::RetryPolicy;

/// Run `op` until it succeeds or the policy runs out of attempts.
///
/// Returns the last error when every attempt failed.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    what,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Poll `check` until it yields a value or the policy runs out of attempts.
///
/// `Ok(None)` means the condition never held within the budget; errors from
/// the check are returned immediately.
pub async fn poll_until<T, E, F, Fut>(policy: &RetryPolicy, mut check: F) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        if let Some(value) = check().await? {
            return Ok(Some(value));
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(policy.delay_for(attempt)).await;
        }
    }
    Ok(None)
}
