//! Log batch and digest decoding.

use serde_json::Value;
use tracing::debug;

use trailwatch_contracts::digest::Digest;
use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};
use trailwatch_contracts::record::ApiCall;

use crate::gzip::inflate;

/// The records recovered from one log file.
#[derive(Debug, Clone, Default)]
pub struct DecodedBatch {
    pub records: Vec<ApiCall>,
    /// Elements of `Records` that were not JSON objects.
    pub skipped: usize,
}

/// A digest together with the exact decompressed bytes it was parsed from.
///
/// Signature verification hashes `body`, never a re-serialization.
#[derive(Debug, Clone)]
pub struct DecodedDigest {
    pub digest: Digest,
    pub body: Vec<u8>,
}

/// Decode a `{ "Records": [...] }` log batch, gzip or plain.
///
/// Each record decodes on its own; a record that is not an object is skipped
/// and counted. The batch as a whole fails only when the payload is not a
/// JSON object with a `Records` array.
pub fn decode_batch(raw: &[u8]) -> TrailwatchResult<DecodedBatch> {
    let body = inflate(raw)?;
    let root: Value = serde_json::from_slice(&body).map_err(|e| TrailwatchError::Decode {
        reason: e.to_string(),
    })?;

    let Some(Value::Array(items)) = root.get("Records") else {
        return Err(TrailwatchError::Decode {
            reason: "log batch has no Records array".to_string(),
        });
    };

    let mut batch = DecodedBatch::default();
    for item in items {
        match serde_json::from_value::<ApiCall>(item.clone()) {
            Ok(call) => batch.records.push(call),
            Err(e) => {
                debug!(error = %e, "skipping undecodable record");
                batch.skipped += 1;
            }
        }
    }
    Ok(batch)
}

/// Decode a digest manifest, gzip or plain.
pub fn decode_digest(raw: &[u8]) -> TrailwatchResult<DecodedDigest> {
    let body = inflate(raw)?;
    let digest = serde_json::from_slice(&body).map_err(|e| TrailwatchError::Decode {
        reason: format!("digest: {e}"),
    })?;
    Ok(DecodedDigest { digest, body })
}
