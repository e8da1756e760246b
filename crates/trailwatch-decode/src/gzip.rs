//! Gzip-or-plain payload handling.
//!
//! CloudTrail delivers `.json.gz` objects, but mirrors and hand-made fixtures
//! are often already inflated. The magic bytes decide, not the file name.

use std::io::Read;

use flate2::read::GzDecoder;

use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};

/// The two leading bytes of every gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Inflate `bytes` when they carry the gzip magic, otherwise return them
/// unchanged.
pub fn inflate(bytes: &[u8]) -> TrailwatchResult<Vec<u8>> {
    if !is_gzip(bytes) {
        return Ok(bytes.to_vec());
    }

    let mut out = Vec::with_capacity(bytes.len() * 8);
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| TrailwatchError::DecompressionFailure {
            reason: e.to_string(),
        })?;
    Ok(out)
}
