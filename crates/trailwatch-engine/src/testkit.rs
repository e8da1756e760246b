//! Signed trail fixtures for end-to-end tests.
//!
//! Builds a single-region, single-day trail whose digests form a correctly
//! signed chain, writes it both to a local root and to an in-memory bucket,
//! and provides a key file holding the signing key.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use sha2::Sha256;
use tempfile::TempDir;

use trailwatch_audit::{hex_encode, sha256_hex, signing_string, InMemoryObjectStore, StaticTrailService};
use trailwatch_contracts::digest::{Digest, LogFileRef};

use crate::config::{EngineConfig, RetryConfig};
use crate::engine::AuditEngine;

pub const ACCOUNT: &str = "111122223333";
pub const BUCKET: &str = "trail-bucket";
pub const REGION: &str = "us-east-1";
pub const FINGERPRINT: &str = "7c4f2a9e0d1b3c5a";

fn private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("key generation"))
}

pub fn sign_hex(message: &[u8]) -> String {
    let signature = SigningKey::<Sha256>::new(private_key().clone()).sign(message);
    hex_encode(&signature.to_bytes())
}

pub fn public_key_b64() -> String {
    let der = private_key().to_public_key().to_pkcs1_der().unwrap();
    STANDARD.encode(der.as_bytes())
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap()
}

/// A record that trips no rule.
pub fn benign() -> Value {
    json!({
        "eventSource": "s3.amazonaws.com",
        "eventName": "GetObject",
        "eventTime": "2024-03-05T00:30:00Z",
        "awsRegion": REGION,
        "sourceIPAddress": "203.0.113.10"
    })
}

pub fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
}

pub struct TrailFixture {
    /// Local trail root (holds `AWSLogs/`).
    pub trail: TempDir,
    /// Scratch space: key files, download directory.
    pub work: TempDir,
    pub store: InMemoryObjectStore,
    /// Oldest first.
    pub digest_keys: Vec<String>,
    /// `log_keys[i]` is listed by `digest_keys[i]`.
    pub log_keys: Vec<String>,
    /// `digest_signatures[i]` signs `digest_keys[i]`.
    pub digest_signatures: Vec<String>,
}

impl TrailFixture {
    /// One digest per batch, an hour apart on 2024-03-05, oldest first.
    pub fn build(batches: Vec<Vec<Value>>) -> Self {
        let bodies = batches
            .into_iter()
            .map(|records| json!({ "Records": records }).to_string().into_bytes())
            .collect();
        Self::build_raw(bodies, |_, _| {})
    }

    /// Like [`TrailFixture::build`], with each log body given verbatim and
    /// `tweak` applied to digest `i` before it is signed.
    pub fn build_raw(bodies: Vec<Vec<u8>>, tweak: impl FnMut(usize, &mut Digest)) -> Self {
        let fixture = Self {
            trail: tempfile::tempdir().unwrap(),
            work: tempfile::tempdir().unwrap(),
            store: InMemoryObjectStore::new().with_page_size(2),
            digest_keys: Vec::new(),
            log_keys: Vec::new(),
            digest_signatures: Vec::new(),
        };
        fixture.write_key_file("keys.json", FINGERPRINT);
        fixture.populate(bodies, tweak)
    }

    fn populate(mut self, bodies: Vec<Vec<u8>>, mut tweak: impl FnMut(usize, &mut Digest)) -> Self {
        let mut previous: Option<(String, String)> = None;

        for (i, log_body) in bodies.into_iter().enumerate() {
            let hour = i as u32 + 1;
            let log_key = format!(
                "AWSLogs/{ACCOUNT}/CloudTrail/{REGION}/2024/03/05/{ACCOUNT}_CloudTrail_{REGION}_20240305T{hour:02}00Z_{i}.json.gz"
            );
            self.put(&log_key, &gzip(&log_body));

            let digest_key = format!(
                "AWSLogs/{ACCOUNT}/CloudTrail-Digest/{REGION}/2024/03/05/{ACCOUNT}_CloudTrail-Digest_{REGION}_trail_{REGION}_20240305T{hour:02}0000Z.json.gz"
            );
            let mut digest = Digest {
                digest_s3_bucket: Some(BUCKET.to_string()),
                digest_s3_object: Some(digest_key.clone()),
                digest_end_time: Some(format!("2024-03-05T{hour:02}:00:00Z")),
                digest_public_key_fingerprint: Some(FINGERPRINT.to_string()),
                digest_signature_algorithm: Some("SHA256withRSA".to_string()),
                previous_digest_s3_bucket: previous.as_ref().map(|_| BUCKET.to_string()),
                previous_digest_s3_object: previous.as_ref().map(|(k, _)| k.clone()),
                previous_digest_hash_value: None,
                previous_digest_hash_algorithm: previous.as_ref().map(|_| "SHA-256".to_string()),
                previous_digest_signature: previous.as_ref().map(|(_, s)| s.clone()),
                log_files: vec![LogFileRef {
                    s3_bucket: Some(BUCKET.to_string()),
                    s3_object: Some(log_key.clone()),
                    hash_value: Some(sha256_hex(&log_body)),
                    hash_algorithm: Some("SHA-256".to_string()),
                }],
            };
            tweak(i, &mut digest);
            let body = serde_json::to_vec(&digest).unwrap();
            let signature = match signing_string(&digest, &body) {
                Some(message) => sign_hex(message.as_bytes()),
                None => sign_hex(&body),
            };
            self.put(&digest_key, &gzip(&body));

            self.log_keys.push(log_key);
            self.digest_keys.push(digest_key.clone());
            self.digest_signatures.push(signature.clone());
            previous = Some((digest_key, signature));
        }

        if let Some((root_key, signature)) = previous {
            self.store.set_signature(BUCKET, &root_key, &signature).unwrap();
        }
        self
    }

    /// Write an object to both the local root and the bucket.
    pub fn put(&self, key: &str, bytes: &[u8]) {
        self.write_local(key, bytes);
        self.store.put_object(BUCKET, key, bytes.to_vec()).unwrap();
    }

    pub fn write_local(&self, key: &str, bytes: &[u8]) {
        let path = self.trail.path().join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    pub fn local_path(&self, key: &str) -> PathBuf {
        self.trail.path().join(key)
    }

    pub fn root(&self) -> &Path {
        self.trail.path()
    }

    pub fn download_dir(&self) -> PathBuf {
        self.work.path().join("download")
    }

    /// A key file listing the test key under `fingerprint`.
    pub fn write_key_file(&self, name: &str, fingerprint: &str) -> PathBuf {
        let path = self.work.path().join(name);
        let table = json!({ REGION: [{ "Value": public_key_b64(), "Fingerprint": fingerprint }] });
        std::fs::write(&path, table.to_string()).unwrap();
        path
    }

    /// Fast retries, one region, the fixture's key file.
    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            regions: vec![REGION.to_string()],
            download_dir: self.download_dir(),
            public_keys_path: Some(self.work.path().join("keys.json")),
            retry: RetryConfig {
                attempts: 2,
                backoff_ms: 0,
                list_page_delay_ms: 0,
                ..RetryConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    pub fn engine(&self, config: EngineConfig) -> AuditEngine {
        AuditEngine::new(
            config,
            Arc::new(self.store.clone()),
            Arc::new(StaticTrailService {
                bucket: Some(BUCKET.to_string()),
                account_id: Some(ACCOUNT.to_string()),
            }),
        )
    }
}
