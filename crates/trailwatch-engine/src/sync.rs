//! Bulk download of an audit window.
//!
//! Two steps, each on its own bounded pool:
//!
//! 1. **Discovery** lists one prefix per region, day, and trail half.
//! 2. **Transfer** fetches every discovered object into the local root.
//!    Failed transfers are collected and retried in rounds, pausing between
//!    rounds, until they succeed or the retry budget is spent.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};
use trailwatch_core::pool::cancellable_sleep;
use trailwatch_core::progress::TaskKind;
use trailwatch_core::store::list_all;
use trailwatch_core::traits::ObjectSummary;
use trailwatch_core::WorkerPool;

use crate::config::PoolConfig;
use crate::context::TrailContext;
use crate::fetch::with_retry;
use crate::layout::{day_prefix, download_days, TrailKind};

/// Counts from one window download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub logs: usize,
    pub digests: usize,
    pub transferred: usize,
    /// Objects still missing after every retry round.
    pub failed: usize,
}

/// Mirror the audit window for `regions` into `ctx.root`.
///
/// The root is wiped first. Returns `AuditFailed` when discovery finds no
/// logs or no digests at all.
pub async fn sync_window(
    ctx: &Arc<TrailContext>,
    regions: &[String],
    pools: &PoolConfig,
) -> TrailwatchResult<SyncStats> {
    clear_root(&ctx.root).await?;

    let objects = discover(ctx, regions, pools.discovery_workers).await?;
    let mut stats = SyncStats::default();
    for object in &objects {
        match TrailKind::of_key(&object.key) {
            Some(TrailKind::Log) => stats.logs += 1,
            Some(TrailKind::Digest) => stats.digests += 1,
            None => {}
        }
    }
    info!(
        run_id = %ctx.session.run_id(),
        logs = stats.logs,
        digests = stats.digests,
        "discovery complete"
    );
    if stats.logs == 0 || stats.digests == 0 {
        return Err(TrailwatchError::AuditFailed {
            reason: "No logs or digests (Is CloudTrail Region correct?)".to_string(),
        });
    }

    let keys: Vec<String> = objects.into_iter().map(|o| o.key).collect();
    let total = keys.len();
    let failed = transfer(ctx, keys, pools.transfer_workers).await?;
    stats.failed = failed.len();
    stats.transferred = total - stats.failed;
    if !failed.is_empty() {
        warn!(failed = failed.len(), "transfers still failing after retries");
    }
    ctx.session.finish_task(TaskKind::Download);
    Ok(stats)
}

async fn clear_root(root: &Path) -> TrailwatchResult<()> {
    match tokio::fs::remove_dir_all(root).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(TrailwatchError::io(root, e)),
    }
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| TrailwatchError::io(root, e))
}

async fn discover(
    ctx: &Arc<TrailContext>,
    regions: &[String],
    workers: usize,
) -> TrailwatchResult<Vec<ObjectSummary>> {
    let session = &ctx.session;
    let days = download_days(session.start(), session.end());
    let mut prefixes = Vec::new();
    for day in &days {
        for region in regions {
            for kind in [TrailKind::Log, TrailKind::Digest] {
                prefixes.push(day_prefix(&ctx.account, kind, region, *day));
            }
        }
    }
    session.update_task(TaskKind::CalculateDownload, |t| {
        t.add_subtasks(prefixes.len() as u64)
    });

    let found: Arc<Mutex<Vec<ObjectSummary>>> = Arc::new(Mutex::new(Vec::new()));
    let pool = WorkerPool::bounded("discovery", workers, session.cancel_token());
    for prefix in prefixes {
        let ctx = Arc::clone(ctx);
        let found = Arc::clone(&found);
        pool.spawn(async move {
            let cancel = ctx.session.cancel_token();
            let retry = &ctx.retry;
            let listed = with_retry(retry.attempts, retry.backoff(), &cancel, || {
                list_all(
                    ctx.store.as_ref(),
                    &ctx.bucket,
                    &prefix,
                    retry.list_page_delay(),
                    &cancel,
                )
            })
            .await;
            match listed {
                Ok(objects) => found
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(objects),
                Err(e) => warn!(prefix = %prefix, error = %e, "listing failed"),
            }
            ctx.session
                .update_task(TaskKind::CalculateDownload, |t| t.complete_subtasks(1));
        });
    }
    pool.drain().await;

    if session.is_failed() {
        return Err(TrailwatchError::Cancelled);
    }
    session.finish_task(TaskKind::CalculateDownload);

    let mut objects = std::mem::take(&mut *found.lock().unwrap_or_else(PoisonError::into_inner));
    objects.sort_by(|a, b| a.key.cmp(&b.key));
    objects.dedup_by(|a, b| a.key == b.key);
    Ok(objects)
}

/// Fetch every key, retrying failures in rounds. Returns the keys that
/// never arrived.
async fn transfer(
    ctx: &Arc<TrailContext>,
    keys: Vec<String>,
    workers: usize,
) -> TrailwatchResult<Vec<String>> {
    let session = &ctx.session;
    session.update_task(TaskKind::Download, |t| t.add_subtasks(keys.len() as u64));

    let cancel = session.cancel_token();
    let mut pending = keys;
    let mut round = 0u32;

    while !pending.is_empty() {
        if round > 0 {
            if round >= ctx.retry.attempts {
                break;
            }
            cancellable_sleep(ctx.retry.backoff(), &cancel).await?;
            info!(round, pending = pending.len(), "retrying failed transfers");
        }
        round += 1;

        let failed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let pool = WorkerPool::bounded("transfer", workers, cancel.clone());
        for key in pending {
            let ctx = Arc::clone(ctx);
            let failed = Arc::clone(&failed);
            pool.spawn(async move {
                if ctx.refetch(&key).await {
                    ctx.session
                        .update_task(TaskKind::Download, |t| t.complete_subtasks(1));
                } else {
                    failed
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(key);
                }
            });
        }
        pool.drain().await;

        if cancel.is_cancelled() {
            return Err(TrailwatchError::Cancelled);
        }
        pending = std::mem::take(&mut *failed.lock().unwrap_or_else(PoisonError::into_inner));
    }

    Ok(pending)
}
