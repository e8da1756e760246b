//! The digest-signing key table.
//!
//! Keys come from a JSON document shaped like the output of
//! `aws cloudtrail list-public-keys`, grouped by region:
//!
//! ```json
//! { "us-east-1": [{ "Value": "<base64 DER>", "Fingerprint": "<hex>" }] }
//! ```
//!
//! A copy ships inside the binary; operators point `public_keys_path` at a
//! fresher export when AWS rotates keys.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};
use trailwatch_contracts::keys::PublicKey;

const BUNDLED_KEYS: &str = include_str!("../public_keys.json");

#[derive(Debug, Deserialize)]
struct KeyEntry {
    #[serde(rename = "Value")]
    value: String,
    #[serde(rename = "Fingerprint")]
    fingerprint: String,
}

/// Public keys indexed by fingerprint.
#[derive(Debug, Clone, Default)]
pub struct KeyTable {
    by_fingerprint: HashMap<String, Vec<PublicKey>>,
}

impl KeyTable {
    pub fn new(keys: impl IntoIterator<Item = PublicKey>) -> Self {
        let mut table = Self::default();
        for key in keys {
            table.insert(key);
        }
        table
    }

    /// The table compiled into the binary.
    pub fn bundled() -> TrailwatchResult<Self> {
        Self::from_json_str(BUNDLED_KEYS)
    }

    pub fn from_json_str(raw: &str) -> TrailwatchResult<Self> {
        let grouped: BTreeMap<String, Vec<KeyEntry>> =
            serde_json::from_str(raw).map_err(|e| TrailwatchError::KeyTable {
                reason: e.to_string(),
            })?;

        let table = Self::new(grouped.into_iter().flat_map(|(region, entries)| {
            entries.into_iter().map(move |entry| PublicKey {
                region: region.clone(),
                key: entry.value,
                fingerprint: entry.fingerprint,
            })
        }));
        debug!(keys = table.len(), "loaded public key table");
        Ok(table)
    }

    pub fn from_file(path: &Path) -> TrailwatchResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| TrailwatchError::KeyTable {
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn insert(&mut self, key: PublicKey) {
        self.by_fingerprint
            .entry(key.fingerprint.clone())
            .or_default()
            .push(key);
    }

    /// The key for `fingerprint`, if exactly one distinct key carries it.
    ///
    /// The same key listed under several regions still counts as one.
    pub fn resolve(&self, fingerprint: &str) -> Option<&PublicKey> {
        let candidates = self.by_fingerprint.get(fingerprint)?;
        let first = candidates.first()?;
        candidates
            .iter()
            .all(|k| k.key == first.key)
            .then_some(first)
    }

    pub fn len(&self) -> usize {
        self.by_fingerprint.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }
}
