//! Bounded exponential backoff for write conflicts.

use std::future::Future;
use std::time::Duration;

use dispatch_core::error::CoreError;

/// Retry bounds for [`with_conflict_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): base doubled each time,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op`, retrying it while it fails with a retryable error.
///
/// `op` is called afresh on every try, so it must re-read whatever state
/// its write depends on. Non-retryable errors and the final conflict after
/// the bound surface unchanged.
pub async fn with_conflict_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && retry < policy.max_retries => {
                let delay = policy.delay_for(retry);
                tracing::debug!(
                    operation,
                    retry = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after write conflict",
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(operation, retries = retry, error = %e, "Write conflict persisted");
                return Err(e);
            }
            other => return other,
        }
    }
}
