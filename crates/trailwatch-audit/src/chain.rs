//! Digest-chain link verification.
//!
//! Each digest is signed over a canonical string that commits to its own
//! location, its exact bytes, and the previous digest's signature:
//!
//!   1. `digestEndTime` verbatim
//!   2. `{digestS3Bucket}/{digestS3Object}`
//!   3. lowercase hex SHA-256 of the decompressed digest body
//!   4. `previousDigestSignature`
//!
//! joined with `\n`. The signature itself lives outside the digest: in the
//! object metadata for the newest digest, and in the successor's
//! `previousDigestSignature` for every older one.

use chrono::{DateTime, Utc};

use trailwatch_contracts::digest::{Digest, PreviousLink};

use crate::crypto::{hex_decode, sha256_hex, verify_rsa_signature};
use crate::keys::KeyTable;

/// Outcome of verifying one digest against the signature that covers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkVerdict {
    /// The digest declares no previous signature; nothing to verify.
    EndOfChain,
    Verified,
    /// The declared fingerprint does not resolve to exactly one key.
    UnknownKey,
    /// The signature does not verify (or is not valid hex).
    BadSignature,
    /// A field the signing string needs is missing.
    Malformed,
}

/// What the walker should do after a verified digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    Previous(PreviousLink),
    /// Outside the audit window, or the true start of the trail.
    Stop,
    /// Exactly one of the previous location and previous signature is set.
    Broken,
    /// `digestEndTime` is absent or unparseable.
    Malformed,
}

/// Build the canonical signing string for `digest`, whose decompressed
/// bytes are `body`.
pub fn signing_string(digest: &Digest, body: &[u8]) -> Option<String> {
    let end_time = digest.digest_end_time.as_deref()?;
    let bucket = digest.digest_s3_bucket.as_deref()?;
    let object = digest.digest_s3_object.as_deref()?;
    let previous = digest.previous_digest_signature.as_deref()?;
    Some(format!(
        "{end_time}\n{bucket}/{object}\n{}\n{previous}",
        sha256_hex(body)
    ))
}

/// Verify `digest` against `signature_hex`, the signature covering it.
pub fn verify_link(digest: &Digest, body: &[u8], signature_hex: &str, keys: &KeyTable) -> LinkVerdict {
    if digest.is_chain_terminus() {
        return LinkVerdict::EndOfChain;
    }
    let Some(message) = signing_string(digest, body) else {
        return LinkVerdict::Malformed;
    };
    let Some(key) = digest
        .digest_public_key_fingerprint
        .as_deref()
        .and_then(|fp| keys.resolve(fp))
    else {
        return LinkVerdict::UnknownKey;
    };
    let Ok(signature) = hex_decode(signature_hex) else {
        return LinkVerdict::BadSignature;
    };

    if verify_rsa_signature(message.as_bytes(), &signature, &key.key) {
        LinkVerdict::Verified
    } else {
        LinkVerdict::BadSignature
    }
}

/// Decide whether the walk continues past `digest`.
///
/// Continues while the digest ended at or after `start` and names its
/// predecessor.
pub fn next_link(digest: &Digest, start: DateTime<Utc>) -> Continuation {
    let Some(end) = digest.end_time() else {
        return Continuation::Malformed;
    };
    if end < start {
        return Continuation::Stop;
    }
    match (
        digest.previous_digest_s3_object.is_some(),
        digest.previous_digest_signature.is_some(),
    ) {
        (false, false) => Continuation::Stop,
        (true, true) => digest
            .previous_link()
            .map_or(Continuation::Broken, Continuation::Previous),
        _ => Continuation::Broken,
    }
}
