//! Signing-key material and per-region root signatures.

use serde::{Deserialize, Serialize};

/// A CloudTrail digest-signing public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub region: String,
    /// Base64 DER (PKCS#1 or SubjectPublicKeyInfo) or a PEM document.
    pub key: String,
    /// Hex fingerprint declared by digests signed with this key.
    pub fingerprint: String,
}

/// The detached signature of a region's newest digest, fetched from object
/// metadata before the chain walk starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRootSignature {
    pub region: String,
    /// Key of the root digest the signature belongs to.
    pub object_key: String,
    pub signature: String,
}
