//! Helpers layered over [`ObjectStore`].

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};

use crate::pool::cancellable_sleep;
use crate::traits::{ObjectStore, ObjectSummary, SIGNATURE_METADATA_KEY};

/// List every object under `prefix`, following pagination markers.
///
/// Sleeps `page_delay` between pages to stay under the provider's listing
/// rate limit. A marker that does not advance ends the listing.
pub async fn list_all(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    page_delay: Duration,
    cancel: &CancellationToken,
) -> TrailwatchResult<Vec<ObjectSummary>> {
    let mut objects = Vec::new();
    let mut marker: Option<String> = None;
    let mut pages = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(TrailwatchError::Cancelled);
        }

        let page = store.list_page(bucket, prefix, marker.as_deref()).await?;
        pages += 1;
        objects.extend(page.objects);

        match page.next_marker {
            Some(next) if marker.as_deref() == Some(next.as_str()) => {
                warn!(prefix = %prefix, marker = %next, "listing marker did not advance; stopping");
                break;
            }
            Some(next) => {
                cancellable_sleep(page_delay, cancel).await?;
                marker = Some(next);
            }
            None => break,
        }
    }

    debug!(prefix = %prefix, pages, objects = objects.len(), "listing complete");
    Ok(objects)
}

/// Fetch the detached signature CloudTrail stores in a digest's metadata.
pub async fn detached_signature(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
) -> TrailwatchResult<String> {
    let metadata = store.object_metadata(bucket, key).await?;
    metadata
        .get(SIGNATURE_METADATA_KEY)
        .cloned()
        .ok_or_else(|| TrailwatchError::Store {
            key: key.to_string(),
            reason: "object carries no signature metadata".to_string(),
        })
}
