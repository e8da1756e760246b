//! CloudTrail digest manifests.
//!
//! A digest lists the log files delivered during one interval and points at
//! the previous digest, so the manifests form a backward-linked chain. The
//! JSON field names are fixed by CloudTrail and must not be renamed.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout used by `digestEndTime` (always UTC, second precision).
pub const DIGEST_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One decompressed digest manifest.
///
/// Parsed fresh from disk for every visit and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Digest {
    pub digest_s3_bucket: Option<String>,
    pub digest_s3_object: Option<String>,
    pub digest_end_time: Option<String>,
    pub digest_public_key_fingerprint: Option<String>,
    pub digest_signature_algorithm: Option<String>,
    pub previous_digest_s3_bucket: Option<String>,
    pub previous_digest_s3_object: Option<String>,
    pub previous_digest_hash_value: Option<String>,
    pub previous_digest_hash_algorithm: Option<String>,
    /// Hex signature of the previous digest. `None` marks the chain terminus.
    pub previous_digest_signature: Option<String>,
    #[serde(default)]
    pub log_files: Vec<LogFileRef>,
}

/// A log file referenced by a digest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFileRef {
    pub s3_bucket: Option<String>,
    pub s3_object: Option<String>,
    /// Lowercase hex SHA-256 of the decompressed log body.
    pub hash_value: Option<String>,
    pub hash_algorithm: Option<String>,
}

/// Where the previous digest lives and the signature that covers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousLink {
    pub object_key: String,
    pub signature: String,
}

impl Digest {
    /// Parse `digestEndTime`. Returns `None` when absent or malformed.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.digest_end_time.as_deref().and_then(parse_digest_time)
    }

    /// True when this digest declares no previous signature.
    pub fn is_chain_terminus(&self) -> bool {
        self.previous_digest_signature.is_none()
    }

    /// The previous digest's key and signature, when both are declared.
    pub fn previous_link(&self) -> Option<PreviousLink> {
        match (&self.previous_digest_s3_object, &self.previous_digest_signature) {
            (Some(object_key), Some(signature)) => Some(PreviousLink {
                object_key: object_key.clone(),
                signature: signature.clone(),
            }),
            _ => None,
        }
    }
}

/// Parse a CloudTrail digest timestamp such as `2024-03-05T17:42:10Z`.
pub fn parse_digest_time(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, DIGEST_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
