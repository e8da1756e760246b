//! What every stage of a run needs to reach the trail.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use trailwatch_core::traits::ObjectStore;

use crate::config::RetryConfig;
use crate::layout::local_path;
use crate::session::AuditSession;

/// The resolved trail location for one run.
pub struct TrailContext {
    pub session: Arc<AuditSession>,
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
    pub account: String,
    /// Local directory holding `AWSLogs/`.
    pub root: PathBuf,
    pub retry: RetryConfig,
}

impl TrailContext {
    /// Local copy of `key`. `None` when the key would leave the root.
    pub fn path(&self, key: &str) -> Option<PathBuf> {
        local_path(&self.root, key)
    }

    /// One re-download attempt of `key` over its local copy.
    pub async fn refetch(&self, key: &str) -> bool {
        let Some(dest) = self.path(key) else {
            warn!(key = %key, "refusing to fetch a key outside the trail root");
            return false;
        };
        match self.store.fetch_object(&self.bucket, key, &dest).await {
            Ok(()) => true,
            Err(e) => {
                debug!(key = %key, error = %e, "re-download failed");
                false
            }
        }
    }
}
