//! Hashing and signature primitives.
//!
//! Digest signatures are RSA PKCS#1 v1.5 over SHA-256. Verification never
//! errors: a key or signature that cannot even be parsed simply does not
//! verify.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Lowercase hex SHA-256, the form digests declare for log files.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex_encode(&sha256(bytes))
}

pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode hex, ignoring embedded whitespace.
pub fn hex_decode(raw: &str) -> TrailwatchResult<Vec<u8>> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact).map_err(|e| TrailwatchError::MalformedHex {
        reason: e.to_string(),
    })
}

/// Parse RSA public key material.
///
/// Accepts PEM (`RSA PUBLIC KEY` or `PUBLIC KEY`) or base64 DER in either
/// PKCS#1 or SubjectPublicKeyInfo form.
pub fn parse_public_key(material: &str) -> Option<RsaPublicKey> {
    let trimmed = material.trim();
    if trimmed.starts_with("-----BEGIN") {
        return RsaPublicKey::from_pkcs1_pem(trimmed)
            .ok()
            .or_else(|| RsaPublicKey::from_public_key_pem(trimmed).ok());
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD.decode(compact).ok()?;
    RsaPublicKey::from_pkcs1_der(&der)
        .ok()
        .or_else(|| RsaPublicKey::from_public_key_der(&der).ok())
}

/// Verify an RSA PKCS#1 v1.5 SHA-256 signature over `message`.
pub fn verify_rsa_signature(message: &[u8], signature: &[u8], public_key: &str) -> bool {
    let Some(key) = parse_public_key(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    VerifyingKey::<Sha256>::new(key)
        .verify(message, &signature)
        .is_ok()
}
