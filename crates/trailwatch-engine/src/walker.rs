//! Digest chain walking.
//!
//! Each region's chain is walked newest to oldest by one task. The task
//! takes a digest-pool permit per link, so links within a region are strictly
//! sequential while regions share the pool's workers.
//!
//! Per link:
//!
//! 1. Load and decode the digest (re-downloading it if it is missing).
//! 2. Verify its signature. A failed check is retried once with the
//!    signature read back from object metadata.
//! 3. Validate every log file it lists, re-downloading on a missing file or
//!    hash mismatch, and queue the logs for scanning. A key that would
//!    resolve outside the trail root is never read or fetched.
//! 4. Follow the previous-digest link while inside the audit window.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use trailwatch_audit::{next_link, verify_link, Continuation, KeyTable, LinkVerdict};
use trailwatch_audit::crypto::sha256_hex;
use trailwatch_contracts::digest::{LogFileRef, PreviousLink};
use trailwatch_contracts::keys::RegionRootSignature;
use trailwatch_contracts::violation::{Violation, ViolationKind};
use trailwatch_core::pool::cancellable_sleep;
use trailwatch_core::progress::TaskKind;
use trailwatch_core::store::detached_signature;
use trailwatch_core::WorkerPool;
use trailwatch_decode::{decode_digest, inflate, DecodedDigest};

use crate::context::TrailContext;
use crate::fetch::{fetch_with_retry, with_retry};
use crate::layout::{day_prefix, key_for_path, region_prefix, trail_files, TrailKind};
use crate::scanner::{LogScanner, QueuedLog};

// ── Region setup ──────────────────────────────────────────────────────────────

/// The newest digest of a region for the audit end date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRoot {
    pub key: String,
    /// Digest files on disk for the region, across all dates.
    pub digest_files: usize,
}

/// Find `region`'s root digest. `Err` carries the fatal reason.
///
/// The directory walk runs on the blocking pool.
pub async fn locate_root(ctx: &TrailContext, region: &str) -> Result<RegionRoot, String> {
    const NO_LAYOUT: &str = "Could not find region directory structure.";

    let end_day = ctx.session.end().date_naive();
    let (Some(region_dir), Some(day_dir)) = (
        ctx.path(&region_prefix(&ctx.account, TrailKind::Digest, region)),
        ctx.path(&day_prefix(&ctx.account, TrailKind::Digest, region, end_day)),
    ) else {
        return Err(NO_LAYOUT.to_string());
    };

    let listed = tokio::task::spawn_blocking(move || {
        trail_files(&region_dir).map(|all| (all.len(), trail_files(&day_dir).unwrap_or_default()))
    })
    .await
    .map_err(|e| {
        warn!(region = %region, error = %e, "digest directory walk failed");
        NO_LAYOUT.to_string()
    })?;
    let Some((digest_files, recent)) = listed else {
        return Err(NO_LAYOUT.to_string());
    };

    let Some(key) = recent.last().and_then(|p| key_for_path(&ctx.root, p)) else {
        return Err("No digests found - error with download?".to_string());
    };

    Ok(RegionRoot { key, digest_files })
}

/// Read the detached signature of a region's root digest.
pub async fn root_signature(
    ctx: &TrailContext,
    region: &str,
    root: &RegionRoot,
) -> Result<RegionRootSignature, String> {
    let cancel = ctx.session.cancel_token();
    let signature = with_retry(ctx.retry.attempts, ctx.retry.backoff(), &cancel, || {
        detached_signature(ctx.store.as_ref(), &ctx.bucket, &root.key)
    })
    .await
    .map_err(|e| {
        debug!(region = %region, error = %e, "root signature lookup failed");
        format!("Failed to get signature for {}", root.key)
    })?;

    Ok(RegionRootSignature {
        region: region.to_string(),
        object_key: root.key.clone(),
        signature,
    })
}

// ── Walker ────────────────────────────────────────────────────────────────────

/// Result of validating one listed log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogCheck {
    Valid,
    Missing,
    Mismatch,
}

pub struct ChainWalker {
    ctx: Arc<TrailContext>,
    keys: Arc<KeyTable>,
    pool: Arc<WorkerPool>,
    scanner: Arc<LogScanner>,
}

impl ChainWalker {
    pub fn new(
        ctx: Arc<TrailContext>,
        keys: Arc<KeyTable>,
        pool: Arc<WorkerPool>,
        scanner: Arc<LogScanner>,
    ) -> Self {
        Self {
            ctx,
            keys,
            pool,
            scanner,
        }
    }

    /// Track the walk of one region's chain on the digest pool.
    pub fn walk(self: &Arc<Self>, root: RegionRootSignature) {
        let this = Arc::clone(self);
        self.pool.track(async move { this.walk_region(root).await });
    }

    async fn walk_region(&self, root: RegionRootSignature) {
        let region = root.region;
        let mut link = PreviousLink {
            object_key: root.object_key,
            signature: root.signature,
        };
        let mut links = 0u32;

        loop {
            let Some(_permit) = self.pool.permit().await else {
                return;
            };
            if self.ctx.session.is_failed() {
                return;
            }

            let next = self.visit(&region, &link, links).await;
            links += 1;
            self.ctx.session.count_digest();
            self.ctx
                .session
                .update_task(TaskKind::ProcessDigests, |t| t.complete_subtasks(1));

            match next {
                Some(previous) => link = previous,
                None => break,
            }
        }

        info!(region = %region, links, "digest chain walked");
    }

    /// Process the digest `index` links behind the region's root and return
    /// the link to follow next, if any.
    async fn visit(&self, region: &str, link: &PreviousLink, index: u32) -> Option<PreviousLink> {
        let session = &self.ctx.session;
        let Some(path) = self.ctx.path(&link.object_key) else {
            warn!(key = %link.object_key, "digest key leaves the trail root");
            session.record(Violation::integrity(
                ViolationKind::MalformedDigest,
                Some(region),
                link.object_key.clone(),
            ));
            return None;
        };
        let path_str = path.display().to_string();

        let Some(decoded) = self.load_digest(&link.object_key, &path).await else {
            session.record(Violation::integrity(
                ViolationKind::MalformedDigest,
                Some(region),
                path_str,
            ));
            return None;
        };

        if index == 0 {
            if let Some(end) = decoded.digest.end_time() {
                session.note_root_digest(end);
            }
        }

        self.check_signature(region, link, &decoded, &path_str).await;

        for (position, log) in (0u32..).zip(&decoded.digest.log_files) {
            self.validate_log(region, (index, position), log, &path_str).await;
        }

        match next_link(&decoded.digest, session.start()) {
            Continuation::Previous(previous) => Some(previous),
            Continuation::Stop => None,
            Continuation::Broken => {
                session.record(Violation::integrity(
                    ViolationKind::BrokenDigestChain,
                    Some(region),
                    path_str,
                ));
                None
            }
            Continuation::Malformed => {
                session.record(Violation::integrity(
                    ViolationKind::MalformedDigest,
                    Some(region),
                    path_str,
                ));
                None
            }
        }
    }

    /// Read and decode a digest, fetching it first when it is not on disk.
    async fn load_digest(&self, key: &str, path: &Path) -> Option<DecodedDigest> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(_) => {
                debug!(key = %key, "digest not on disk; fetching");
                let retry = &self.ctx.retry;
                fetch_with_retry(
                    self.ctx.store.as_ref(),
                    &self.ctx.bucket,
                    key,
                    path,
                    retry.attempts,
                    retry.backoff(),
                    &self.ctx.session.cancel_token(),
                )
                .await
                .ok()?;
                tokio::fs::read(path).await.ok()?
            }
        };

        match decode_digest(&raw) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key = %key, error = %e, "digest undecodable");
                None
            }
        }
    }

    async fn check_signature(
        &self,
        region: &str,
        link: &PreviousLink,
        decoded: &DecodedDigest,
        path: &str,
    ) {
        let session = &self.ctx.session;
        let (digest, body) = (&decoded.digest, &decoded.body);

        match verify_link(digest, body, &link.signature, &self.keys) {
            LinkVerdict::EndOfChain | LinkVerdict::Verified => {}
            LinkVerdict::UnknownKey => {
                session.record(Violation::integrity(
                    ViolationKind::UnknownSigningKey,
                    Some(region),
                    path,
                ));
            }
            LinkVerdict::Malformed => {
                session.record(Violation::integrity(
                    ViolationKind::MalformedDigest,
                    Some(region),
                    path,
                ));
            }
            LinkVerdict::BadSignature => {
                warn!(key = %link.object_key, "signature check failed; trying object metadata");
                let backup =
                    detached_signature(self.ctx.store.as_ref(), &self.ctx.bucket, &link.object_key)
                        .await;
                let recovered = match backup {
                    Ok(signature) => {
                        verify_link(digest, body, &signature, &self.keys) == LinkVerdict::Verified
                    }
                    Err(e) => {
                        debug!(key = %link.object_key, error = %e, "metadata signature unavailable");
                        false
                    }
                };
                if !recovered {
                    session.record(Violation::integrity(
                        ViolationKind::CorruptedTrailFile,
                        Some(region),
                        path,
                    ));
                }
            }
        }
    }

    /// Validate one listed log, re-downloading as needed, then queue it.
    ///
    /// `at` is the listing digest's link index and the log's index in it.
    async fn validate_log(
        &self,
        region: &str,
        at: (u32, u32),
        log: &LogFileRef,
        digest_path: &str,
    ) {
        let session = &self.ctx.session;
        let Some((key, path)) = log
            .s3_object
            .as_deref()
            .and_then(|key| Some((key, self.ctx.path(key)?)))
        else {
            warn!(digest = %digest_path, key = ?log.s3_object, "log reference unusable");
            session.record(Violation::integrity(
                ViolationKind::MalformedDigest,
                Some(region),
                digest_path,
            ));
            return;
        };
        let expected = log.hash_value.as_deref().unwrap_or_default();
        let cancel = session.cancel_token();

        let mut state = check_log(&path, expected).await;
        let mut attempt = 0;
        while state != LogCheck::Valid && attempt < self.ctx.retry.attempts {
            attempt += 1;
            if attempt > 1 && cancellable_sleep(self.ctx.retry.backoff(), &cancel).await.is_err() {
                return;
            }
            debug!(key = %key, attempt, state = ?state, "re-downloading log");
            self.ctx.refetch(key).await;
            state = check_log(&path, expected).await;
        }

        let path_str = path.display().to_string();
        match state {
            LogCheck::Valid => {}
            LogCheck::Missing => {
                session.record(Violation::integrity(
                    ViolationKind::MissingLogFile,
                    Some(region),
                    path_str,
                ));
                return;
            }
            LogCheck::Mismatch => {
                session.record(Violation::integrity(
                    ViolationKind::WrongSha256,
                    Some(region),
                    path_str,
                ));
            }
        }

        self.scanner.enqueue(QueuedLog {
            key: key.to_string(),
            path,
            region: region.to_string(),
            link: at.0,
            index: at.1,
        });
    }
}

async fn check_log(path: &Path, expected: &str) -> LogCheck {
    let Ok(raw) = tokio::fs::read(path).await else {
        return LogCheck::Missing;
    };
    match inflate(&raw) {
        Ok(body) if sha256_hex(&body).eq_ignore_ascii_case(expected) => LogCheck::Valid,
        _ => LogCheck::Mismatch,
    }
}
