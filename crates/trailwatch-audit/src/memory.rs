//! In-memory implementation of `ObjectStore`.
//!
//! `InMemoryObjectStore` stands in for a trail bucket in tests and local
//! tooling. Objects are kept in a `BTreeMap` so listings come back in key
//! order, the way S3 returns them, and pages are cut at a configurable size
//! so pagination is exercised.
//!
//! Fetches can be made to fail a set number of times per key to drive the
//! retry paths.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};
use trailwatch_core::traits::{
    ListPage, ObjectStore, ObjectSummary, TrailService, SIGNATURE_METADATA_KEY,
};

// ── Internal mutable state ────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
    /// `(bucket, key)` → body.
    objects: BTreeMap<(String, String), Vec<u8>>,
    metadata: HashMap<(String, String), HashMap<String, String>>,
    /// Remaining injected fetch failures per key.
    failures: HashMap<String, usize>,
    fetches: HashMap<String, usize>,
}

// ── Public store ──────────────────────────────────────────────────────────────

/// A thread-safe in-memory bucket.
///
/// Clones share the same contents.
#[derive(Clone)]
pub struct InMemoryObjectStore {
    state: Arc<Mutex<StoreState>>,
    page_size: usize,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            page_size: 1000,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self, key: &str) -> TrailwatchResult<std::sync::MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|e| TrailwatchError::Store {
            key: key.to_string(),
            reason: format!("store state lock poisoned: {e}"),
        })
    }

    /// Insert or replace an object.
    pub fn put_object(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) -> TrailwatchResult<()> {
        let mut state = self.lock(key)?;
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), body.into());
        Ok(())
    }

    /// Attach a detached digest signature to `key`'s metadata.
    pub fn set_signature(&self, bucket: &str, key: &str, signature: &str) -> TrailwatchResult<()> {
        let mut state = self.lock(key)?;
        state
            .metadata
            .entry((bucket.to_string(), key.to_string()))
            .or_default()
            .insert(SIGNATURE_METADATA_KEY.to_string(), signature.to_string());
        Ok(())
    }

    /// Make the next `count` fetches of `key` fail.
    pub fn fail_fetches(&self, key: &str, count: usize) -> TrailwatchResult<()> {
        let mut state = self.lock(key)?;
        state.failures.insert(key.to_string(), count);
        Ok(())
    }

    /// How many times `key` has been fetched, failed attempts included.
    pub fn fetch_count(&self, key: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.fetches.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

// ── ObjectStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> TrailwatchResult<ListPage> {
        let state = self.lock(prefix)?;
        let mut matching = state
            .objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .filter(|((_, k), _)| marker.map_or(true, |m| k.as_str() > m))
            .map(|((_, k), body)| ObjectSummary {
                key: k.clone(),
                size: body.len() as u64,
            });

        let objects: Vec<ObjectSummary> = matching.by_ref().take(self.page_size).collect();
        let next_marker = if matching.next().is_some() {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_marker,
        })
    }

    async fn fetch_object(&self, bucket: &str, key: &str, dest: &Path) -> TrailwatchResult<()> {
        let body = {
            let mut state = self.lock(key)?;
            *state.fetches.entry(key.to_string()).or_insert(0) += 1;

            if let Some(remaining) = state.failures.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TrailwatchError::Store {
                        key: key.to_string(),
                        reason: "injected fetch failure".to_string(),
                    });
                }
            }

            state
                .objects
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| TrailwatchError::Store {
                    key: key.to_string(),
                    reason: "no such key".to_string(),
                })?
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TrailwatchError::io(parent, e))?;
        }
        tokio::fs::write(dest, body)
            .await
            .map_err(|e| TrailwatchError::io(dest, e))
    }

    async fn object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> TrailwatchResult<HashMap<String, String>> {
        let state = self.lock(key)?;
        let id = (bucket.to_string(), key.to_string());
        if !state.objects.contains_key(&id) {
            return Err(TrailwatchError::Store {
                key: key.to_string(),
                reason: "no such key".to_string(),
            });
        }
        Ok(state.metadata.get(&id).cloned().unwrap_or_default())
    }
}

// ── Trail service ─────────────────────────────────────────────────────────────

/// A `TrailService` answering with fixed values.
///
/// `None` fields answer with an error, for driving the fatal paths.
#[derive(Debug, Clone, Default)]
pub struct StaticTrailService {
    pub bucket: Option<String>,
    pub account_id: Option<String>,
}

#[async_trait]
impl TrailService for StaticTrailService {
    async fn trail_bucket(&self) -> TrailwatchResult<String> {
        self.bucket.clone().ok_or_else(|| TrailwatchError::Store {
            key: String::new(),
            reason: "no trail configured".to_string(),
        })
    }

    async fn account_id(&self, region: &str) -> TrailwatchResult<String> {
        self.account_id.clone().ok_or_else(|| TrailwatchError::Store {
            key: String::new(),
            reason: format!("caller identity unavailable in {region}"),
        })
    }
}
