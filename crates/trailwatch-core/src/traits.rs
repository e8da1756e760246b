//! Collaborator trait definitions for the trailwatch pipeline.
//!
//! The auditor never talks to a cloud SDK directly. These two traits are the
//! whole boundary:
//!
//! - `ObjectStore`: the bucket holding the trail (list, fetch, metadata)
//! - `TrailService`: account-level lookups (trail bucket, account id)
//!
//! Implementations are expected to do their own request signing. Signed
//! access expires, so every call must sign afresh instead of caching a
//! pre-signed URL.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use trailwatch_contracts::error::TrailwatchResult;

/// Object metadata key under which CloudTrail stores a digest's detached
/// signature.
pub const SIGNATURE_METADATA_KEY: &str = "signature";

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    /// Marker for the next page. `None` when the listing is complete.
    pub next_marker: Option<String>,
}

/// The bucket that receives CloudTrail log and digest objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Return one page of objects whose keys start with `prefix`, resuming
    /// after `marker` when given.
    ///
    /// Use [`list_all`](crate::store::list_all) to follow every page.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> TrailwatchResult<ListPage>;

    /// Download `key` to `dest`, creating parent directories as needed.
    ///
    /// Resolves only once the object is fully written (or has failed).
    async fn fetch_object(&self, bucket: &str, key: &str, dest: &Path) -> TrailwatchResult<()>;

    /// Return the user metadata attached to `key`.
    async fn object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> TrailwatchResult<HashMap<String, String>>;
}

/// Account-level lookups needed before any object can be read.
#[async_trait]
pub trait TrailService: Send + Sync {
    /// Name of the bucket the account's trail delivers into.
    async fn trail_bucket(&self) -> TrailwatchResult<String>;

    /// The account id the credentials belong to, resolved through `region`.
    async fn account_id(&self, region: &str) -> TrailwatchResult<String>;
}
