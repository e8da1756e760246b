//! Runtime error types for the trailwatch audit pipeline.
//!
//! Only conditions that stop an operation are errors. Integrity findings
//! (bad hashes, unknown keys, corrupted digests) are recorded as
//! [`Violation`](crate::violation::Violation)s and never flow through here.

use thiserror::Error;

/// The unified error type for the trailwatch crates.
#[derive(Debug, Error)]
pub enum TrailwatchError {
    /// A hex string contained non-hex characters or had an odd length.
    #[error("malformed hex: {reason}")]
    MalformedHex { reason: String },

    /// The payload carried gzip magic bytes but could not be inflated.
    #[error("decompression failure: {reason}")]
    DecompressionFailure { reason: String },

    /// A JSON document (digest or log batch) could not be decoded.
    #[error("decode error: {reason}")]
    Decode { reason: String },

    /// The object store rejected or failed a request for `key`.
    #[error("object store error for '{key}': {reason}")]
    Store { key: String, reason: String },

    /// Local filesystem access failed.
    #[error("i/o error at '{path}': {reason}")]
    Io { path: String, reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// The public-key table could not be loaded.
    #[error("public key table error: {reason}")]
    KeyTable { reason: String },

    /// A fatal condition stopped the audit.
    #[error("audit failed: {reason}")]
    AuditFailed { reason: String },

    /// The operation observed the session's cancellation signal.
    #[error("operation cancelled")]
    Cancelled,
}

impl TrailwatchError {
    /// Wrap a `std::io::Error` together with the path that produced it.
    pub fn io(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Convenience alias used throughout the trailwatch crates.
pub type TrailwatchResult<T> = Result<T, TrailwatchError>;
