//! Log file scanning.
//!
//! Runs on the log pool once every digest has been verified. Each file is
//! decoded, every record goes through the rule engine and the deployment
//! tracker, and the processed-log count advances whatever the outcome.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use trailwatch_contracts::violation::{Violation, ViolationKind};
use trailwatch_core::pool::cancellable_sleep;
use trailwatch_core::progress::TaskKind;
use trailwatch_core::WorkerPool;
use trailwatch_decode::{decode_batch, DecodedBatch};
use trailwatch_policy::{RuleEngine, WalkPosition};

use crate::context::TrailContext;

/// A verified log waiting for the log pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedLog {
    pub key: String,
    /// Local copy of `key`, already confined to the trail root.
    pub path: PathBuf,
    pub region: String,
    /// Links between the listing digest and its region's root.
    pub link: u32,
    /// Index of the log in the listing digest.
    pub index: u32,
}

pub struct LogScanner {
    ctx: Arc<TrailContext>,
    rules: RuleEngine,
    pool: Arc<WorkerPool>,
}

impl LogScanner {
    pub fn new(ctx: Arc<TrailContext>, rules: RuleEngine, pool: Arc<WorkerPool>) -> Self {
        Self { ctx, rules, pool }
    }

    /// Queue `log` for scanning. Runs once the log pool is opened.
    pub fn enqueue(self: &Arc<Self>, log: QueuedLog) {
        self.ctx
            .session
            .update_task(TaskKind::ProcessLogs, |t| t.add_subtasks(1));
        let this = Arc::clone(self);
        self.pool.spawn(async move { this.scan(&log).await });
    }

    async fn scan(&self, log: &QueuedLog) {
        let session = &self.ctx.session;
        if session.is_failed() {
            return;
        }

        let path_str = log.path.display().to_string();

        match tokio::fs::read(&log.path).await {
            Err(e) => {
                debug!(key = %log.key, error = %e, "log vanished before scanning");
                session.record(Violation::integrity(
                    ViolationKind::MissingLogRecords,
                    Some(log.region.as_str()),
                    path_str,
                ));
            }
            Ok(raw) => match decode_batch(&raw) {
                Ok(batch) => self.apply(log, &path_str, &batch),
                Err(e) => {
                    warn!(key = %log.key, error = %e, "log undecodable; re-downloading");
                    match self.recover(log).await {
                        Some(batch) => self.apply(log, &path_str, &batch),
                        None if session.is_failed() => return,
                        None => session.record(Violation::integrity(
                            ViolationKind::CouldNotLoadRecord,
                            Some(log.region.as_str()),
                            path_str,
                        )),
                    }
                }
            },
        }

        session.count_log();
        session.update_task(TaskKind::ProcessLogs, |t| t.complete_subtasks(1));
    }

    /// Re-download and re-decode until the batch decodes or the budget is
    /// spent.
    async fn recover(&self, log: &QueuedLog) -> Option<DecodedBatch> {
        let cancel = self.ctx.session.cancel_token();
        for attempt in 1..=self.ctx.retry.attempts.max(1) {
            if attempt > 1 && cancellable_sleep(self.ctx.retry.backoff(), &cancel).await.is_err() {
                return None;
            }
            if !self.ctx.refetch(&log.key).await {
                continue;
            }
            let Ok(raw) = tokio::fs::read(&log.path).await else {
                continue;
            };
            if let Ok(batch) = decode_batch(&raw) {
                debug!(key = %log.key, attempt, "log recovered");
                return Some(batch);
            }
        }
        None
    }

    fn apply(&self, log: &QueuedLog, path: &str, batch: &DecodedBatch) {
        let session = &self.ctx.session;
        for (record, call) in (0u32..).zip(&batch.records) {
            session.record_all(self.rules.evaluate(call, path));
            session.observe_deployment(
                call,
                WalkPosition {
                    link: log.link,
                    log: log.index,
                    record,
                    region: log.region.clone(),
                },
            );
        }
        if batch.skipped > 0 {
            debug!(path = %path, skipped = batch.skipped, "records skipped");
        }
    }
}
