//! Bounded retries around store calls.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};
use trailwatch_core::pool::cancellable_sleep;
use trailwatch_core::traits::ObjectStore;

/// Run `op` up to `attempts` times, sleeping `backoff` between failures.
///
/// Returns the last error once the budget is spent, or `Cancelled` as soon
/// as the token fires. `attempts` of zero still tries once.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    backoff: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> TrailwatchResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TrailwatchResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(TrailwatchError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(TrailwatchError::Cancelled) => return Err(TrailwatchError::Cancelled),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                debug!(attempt, error = %e, "retrying after failure");
                attempt += 1;
                cancellable_sleep(backoff, cancel).await?;
            }
        }
    }
}

/// Fetch `key` to `dest`, retrying transient failures.
pub async fn fetch_with_retry(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    dest: &Path,
    attempts: u32,
    backoff: Duration,
    cancel: &CancellationToken,
) -> TrailwatchResult<()> {
    with_retry(attempts, backoff, cancel, || store.fetch_object(bucket, key, dest)).await
}
