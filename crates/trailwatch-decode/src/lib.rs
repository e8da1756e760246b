//! # trailwatch-decode
//!
//! Turns raw trail objects into typed values.
//!
//! Two phases, in order:
//!
//! 1. **Inflate**: gzip is detected by magic bytes and inflated; anything
//!    else passes through untouched.
//! 2. **Decode**: log batches decode record by record, so one bad record
//!    never costs the rest of the file. Digests decode as a whole and keep
//!    their exact body for hashing.

pub mod batch;
pub mod gzip;

pub use batch::{decode_batch, decode_digest, DecodedBatch, DecodedDigest};
pub use gzip::{inflate, is_gzip};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;

    use trailwatch_contracts::error::TrailwatchError;

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(bytes).unwrap();
        enc.finish().unwrap()
    }

    // ── Inflate ───────────────────────────────────────────────────────────────

    /// Plain bytes pass through unchanged.
    #[test]
    fn test_plain_passthrough() {
        let body = br#"{"Records":[]}"#;
        assert!(!is_gzip(body));
        assert_eq!(inflate(body).unwrap(), body.to_vec());
    }

    #[test]
    fn test_gzip_inflates() {
        let packed = gzip(b"hello trail");
        assert!(is_gzip(&packed));
        assert_eq!(inflate(&packed).unwrap(), b"hello trail".to_vec());
    }

    /// Gzip magic followed by garbage is a decompression failure.
    #[test]
    fn test_truncated_gzip_fails() {
        let packed = gzip(b"hello trail, a somewhat longer body");
        let truncated = &packed[..packed.len() / 2];
        assert!(matches!(
            inflate(truncated),
            Err(TrailwatchError::DecompressionFailure { .. })
        ));
    }

    // ── Batches ───────────────────────────────────────────────────────────────

    /// A bad record is skipped while its neighbours survive.
    #[test]
    fn test_batch_tolerates_bad_records() {
        let raw = json!({
            "Records": [
                { "eventSource": "ssm.amazonaws.com", "eventName": "StartSession" },
                "not a record",
                { "eventSource": "ec2.amazonaws.com", "eventName": 7 }
            ]
        })
        .to_string();

        let batch = decode_batch(&gzip(raw.as_bytes())).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.skipped, 1);
        assert!(batch.records[0].is("ssm.amazonaws.com", "StartSession"));
        assert!(batch.records[1].event_name.is_none());
    }

    /// A payload without a Records array fails the whole batch.
    #[test]
    fn test_batch_without_records_fails() {
        assert!(matches!(
            decode_batch(br#"{"records": []}"#),
            Err(TrailwatchError::Decode { .. })
        ));
        assert!(matches!(
            decode_batch(b"]]not json"),
            Err(TrailwatchError::Decode { .. })
        ));
    }

    #[test]
    fn test_empty_batch() {
        let batch = decode_batch(br#"{"Records": []}"#).unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.skipped, 0);
    }

    // ── Digests ───────────────────────────────────────────────────────────────

    /// The decoded digest keeps the exact inflated body.
    #[test]
    fn test_digest_keeps_body() {
        let raw = br#"{"digestEndTime":"2024-03-05T17:42:10Z","logFiles":[]}"#;
        let decoded = decode_digest(&gzip(raw)).unwrap();

        assert_eq!(decoded.body, raw.to_vec());
        assert_eq!(
            decoded.digest.digest_end_time.as_deref(),
            Some("2024-03-05T17:42:10Z")
        );
        assert!(decoded.digest.is_chain_terminus());
    }

    #[test]
    fn test_malformed_digest_fails() {
        assert!(matches!(
            decode_digest(b"{\"logFiles\": 3}"),
            Err(TrailwatchError::Decode { .. })
        ));
    }
}
