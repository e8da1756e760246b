//! A directory acting as a bucket.
//!
//! `FsObjectStore` serves a local mirror of a trail bucket: object keys are
//! paths relative to the root, and the metadata CloudTrail attaches to a
//! digest lives in a `<key>.metadata.json` sidecar:
//!
//! ```json
//! { "signature": "5a0f..." }
//! ```
//!
//! The bucket name is ignored; one root holds one bucket.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};
use trailwatch_core::traits::{ListPage, ObjectStore, ObjectSummary};

use crate::layout::{key_for_path, local_path};

const SIDECAR_SUFFIX: &str = ".metadata.json";

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    page_size: usize,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: 1000,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> TrailwatchResult<PathBuf> {
        local_path(&self.root, key).ok_or_else(|| TrailwatchError::Store {
            key: key.to_string(),
            reason: "key resolves outside the bucket root".to_string(),
        })
    }

    fn sidecar_path(&self, key: &str) -> TrailwatchResult<PathBuf> {
        self.object_path(&format!("{key}{SIDECAR_SUFFIX}"))
    }
}

/// Every object key under `prefix`, sorted.
fn keys_under(root: &Path, prefix: &str) -> Vec<(String, u64)> {
    // Walk the deepest directory the prefix names, then filter by the rest.
    let dir = match prefix.rfind('/') {
        Some(idx) => match local_path(root, &prefix[..idx]) {
            Some(dir) => dir,
            None => return Vec::new(),
        },
        None => root.to_path_buf(),
    };

    let mut keys: Vec<(String, u64)> = WalkDir::new(&dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let key = key_for_path(root, e.path())?;
            let size = e.metadata().map(|m| m.len()).unwrap_or(0);
            Some((key, size))
        })
        .filter(|(key, _)| key.starts_with(prefix) && !key.ends_with(SIDECAR_SUFFIX))
        .collect();
    keys.sort();
    keys
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list_page(
        &self,
        _bucket: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> TrailwatchResult<ListPage> {
        let root = self.root.clone();
        let owned_prefix = prefix.to_string();
        let keys = tokio::task::spawn_blocking(move || keys_under(&root, &owned_prefix))
            .await
            .map_err(|e| TrailwatchError::Store {
                key: prefix.to_string(),
                reason: format!("listing task failed: {e}"),
            })?;

        let mut remaining = keys
            .into_iter()
            .filter(|(key, _)| marker.map_or(true, |m| key.as_str() > m));
        let objects: Vec<ObjectSummary> = remaining
            .by_ref()
            .take(self.page_size)
            .map(|(key, size)| ObjectSummary { key, size })
            .collect();
        let next_marker = match remaining.next() {
            Some(_) => objects.last().map(|o| o.key.clone()),
            None => None,
        };

        Ok(ListPage {
            objects,
            next_marker,
        })
    }

    async fn fetch_object(&self, _bucket: &str, key: &str, dest: &Path) -> TrailwatchResult<()> {
        let source = self.object_path(key)?;
        if source == dest {
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TrailwatchError::io(parent, e))?;
        }
        tokio::fs::copy(&source, dest)
            .await
            .map_err(|e| TrailwatchError::Store {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn object_metadata(
        &self,
        _bucket: &str,
        key: &str,
    ) -> TrailwatchResult<HashMap<String, String>> {
        if !tokio::fs::try_exists(self.object_path(key)?).await.unwrap_or(false) {
            return Err(TrailwatchError::Store {
                key: key.to_string(),
                reason: "no such key".to_string(),
            });
        }

        let sidecar = self.sidecar_path(key)?;
        let raw = match tokio::fs::read(&sidecar).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(TrailwatchError::io(&sidecar, e)),
        };
        serde_json::from_slice(&raw).map_err(|e| TrailwatchError::Store {
            key: key.to_string(),
            reason: format!("unreadable metadata sidecar: {e}"),
        })
    }
}
