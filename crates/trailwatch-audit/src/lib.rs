//! # trailwatch-audit
//!
//! Integrity verification for CloudTrail digest chains.
//!
//! ## Overview
//!
//! CloudTrail signs every digest over a string that includes the previous
//! digest's signature, so the digests form a signed backward chain. Each
//! digest in turn lists the SHA-256 of every log file delivered in its
//! interval. Breaking any link (an altered byte in a digest, a swapped
//! signature, an edited log) is detected here.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trailwatch_audit::{chain::verify_link, keys::KeyTable};
//!
//! let keys = KeyTable::bundled()?;
//! match verify_link(&digest, &body, &signature_hex, &keys) {
//!     LinkVerdict::Verified | LinkVerdict::EndOfChain => {}
//!     other => record_violation(other),
//! }
//! ```

pub mod chain;
pub mod crypto;
pub mod keys;
pub mod memory;

pub use chain::{next_link, signing_string, verify_link, Continuation, LinkVerdict};
pub use crypto::{hex_decode, hex_encode, sha256, sha256_hex, verify_rsa_signature};
pub use keys::KeyTable;
pub use memory::{InMemoryObjectStore, StaticTrailService};

// ── Tests ─────────────────────────────────────────────────────────────────────
