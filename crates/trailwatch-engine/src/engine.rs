//! The audit orchestrator.
//!
//! `AuditEngine` owns the configuration and the collaborators; every call to
//! [`AuditEngine::begin_audit`] builds a fresh [`AuditSession`] and drives it
//! through the pipeline:
//!
//! 1. **Resolve context**: trail bucket, account id, local root.
//! 2. **Download** (download mode only): mirror the audit window.
//! 3. **Process digests**: find each region's root digest and its detached
//!    signature, load the signing keys, then open the digest pool and walk
//!    every chain.
//! 4. **Process logs**: once the digest pool has drained, open the log pool
//!    and scan every queued log.
//!
//! A fatal condition at any point ends the run through
//! [`AuditSession::fail`]; stages check for it between units of work.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use trailwatch_audit::KeyTable;
use trailwatch_contracts::error::TrailwatchError;
use trailwatch_contracts::violation::Violation;
use trailwatch_core::progress::TaskKind;
use trailwatch_core::traits::{ObjectStore, TrailService};
use trailwatch_core::WorkerPool;
use trailwatch_policy::RuleEngine;

use crate::config::EngineConfig;
use crate::context::TrailContext;
use crate::layout::infer_account;
use crate::scanner::LogScanner;
use crate::session::{AuditOutcome, AuditPhase, AuditSession};
use crate::sync::sync_window;
use crate::walker::{locate_root, root_signature, ChainWalker};

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub run_id: Uuid,
    pub outcome: AuditOutcome,
    pub violations: Vec<Violation>,
    /// Application → latest deployed revision URL.
    pub deployments: BTreeMap<String, String>,
    pub digests_processed: u64,
    pub logs_processed: u64,
    /// Seconds since the stalest region's newest digest ended.
    pub furthest_start_log_secs: u64,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.outcome == AuditOutcome::Completed && self.violations.is_empty()
    }

    pub fn furthest_start_log(&self) -> Duration {
        Duration::from_secs(self.furthest_start_log_secs)
    }

    /// Whole days covered by [`AuditReport::furthest_start_log`].
    pub fn staleness_days(&self) -> u64 {
        self.furthest_start_log_secs / 86_400
    }
}

pub struct AuditEngine {
    config: EngineConfig,
    store: Arc<dyn ObjectStore>,
    trail: Arc<dyn TrailService>,
    current: Mutex<Option<Arc<AuditSession>>>,
}

impl AuditEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ObjectStore>,
        trail: Arc<dyn TrailService>,
    ) -> Self {
        Self {
            config,
            store,
            trail,
            current: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn session(&self) -> Option<Arc<AuditSession>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Percent complete of the current run; zero before any run.
    pub fn percent_complete(&self) -> f64 {
        self.session().map_or(0.0, |s| s.percent_complete())
    }

    pub fn current_task_name(&self) -> Option<&'static str> {
        self.session().and_then(|s| s.current_task_name())
    }

    pub fn phase(&self) -> AuditPhase {
        self.session().map_or(AuditPhase::Idle, |s| s.phase())
    }

    /// Stop the current run for `reason`. The first reason wins.
    pub fn fail_ability_to_audit(&self, reason: &str) {
        if let Some(session) = self.session() {
            session.fail(reason);
        }
    }

    /// Run a complete audit of `[start, end]`.
    ///
    /// With `local_source`, the trail is read from that directory; without
    /// it, the window is first downloaded into the configured download
    /// directory. `on_progress` fires whenever progress may have changed and
    /// `on_finished` fires exactly once when the run ends, either way.
    pub async fn begin_audit<P, F>(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        local_source: Option<&Path>,
        on_progress: P,
        on_finished: F,
    ) -> AuditReport
    where
        P: Fn() + Send + Sync + 'static,
        F: FnOnce(AuditOutcome) + Send + 'static,
    {
        let session = Arc::new(AuditSession::new(
            start,
            end,
            self.config.weights.audit_task(),
            Arc::new(on_progress),
            Box::new(on_finished),
        ));
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&session));
        if let Some(previous) = previous {
            previous.fail("superseded by a new audit");
        }

        info!(
            run_id = %session.run_id(),
            start = %start,
            end = %end,
            local = local_source.is_some(),
            "audit started"
        );

        self.run(&session, local_source).await;
        session.complete();
        report(&session)
    }

    async fn run(&self, session: &Arc<AuditSession>, local_source: Option<&Path>) {
        session.enter(AuditPhase::ResolvingContext);
        let Some(ctx) = self.resolve_context(session, local_source).await else {
            return;
        };
        let ctx = Arc::new(ctx);

        if local_source.is_none() {
            session.enter(AuditPhase::Downloading);
            match sync_window(&ctx, &self.config.regions, &self.config.pools).await {
                Ok(stats) => info!(
                    run_id = %session.run_id(),
                    transferred = stats.transferred,
                    failed = stats.failed,
                    "download complete"
                ),
                Err(e) => {
                    fail_with(session, e);
                    return;
                }
            }
        } else {
            session.finish_task(TaskKind::CalculateDownload);
            session.finish_task(TaskKind::Download);
        }

        if session.is_failed() {
            return;
        }
        session.enter(AuditPhase::ProcessingDigests);
        self.process(session, ctx).await;
    }

    async fn resolve_context(
        &self,
        session: &Arc<AuditSession>,
        local_source: Option<&Path>,
    ) -> Option<TrailContext> {
        let bucket = match self.trail.trail_bucket().await {
            Ok(bucket) => bucket,
            Err(e) => {
                warn!(error = %e, "trail bucket lookup failed");
                session.fail("Could not get bucket name. Please check AWS Credentials.");
                return None;
            }
        };

        let (root, account): (PathBuf, String) = match local_source {
            Some(source) => {
                let account = match &self.config.account_id {
                    Some(id) => id.clone(),
                    None => match infer_account(source) {
                        Ok(id) => id,
                        Err(e) => {
                            warn!(error = %e, "account inference failed");
                            session.fail("Could not find Account ID in directory structure.");
                            return None;
                        }
                    },
                };
                (source.to_path_buf(), account)
            }
            None => {
                let account = match &self.config.account_id {
                    Some(id) => id.clone(),
                    None => {
                        let region = self
                            .config
                            .regions
                            .first()
                            .map(String::as_str)
                            .unwrap_or("us-east-1");
                        match self.trail.account_id(region).await {
                            Ok(id) => id,
                            Err(e) => {
                                warn!(error = %e, "account lookup failed");
                                session.fail("Could not retrieve Account ID");
                                return None;
                            }
                        }
                    }
                };
                (self.config.download_dir.clone(), account)
            }
        };

        info!(
            run_id = %session.run_id(),
            bucket = %bucket,
            account = %account,
            root = %root.display(),
            "trail resolved"
        );

        Some(TrailContext {
            session: Arc::clone(session),
            store: Arc::clone(&self.store),
            bucket,
            account,
            root,
            retry: self.config.retry.clone(),
        })
    }

    async fn process(&self, session: &Arc<AuditSession>, ctx: Arc<TrailContext>) {
        let cancel = session.cancel_token();
        let regions = &self.config.regions;

        // Region setup: one worker per region.
        let setup = WorkerPool::bounded("setup", regions.len().max(1), cancel.clone());
        for region in regions {
            let ctx = Arc::clone(&ctx);
            let region = region.clone();
            setup.spawn(async move {
                let session = &ctx.session;
                let root = match locate_root(&ctx, &region).await {
                    Ok(root) => root,
                    Err(reason) => {
                        session.fail(reason);
                        return;
                    }
                };
                session.update_task(TaskKind::ProcessDigests, |t| {
                    t.add_subtasks(root.digest_files as u64)
                });
                match root_signature(&ctx, &region, &root).await {
                    Ok(signature) => session.add_root_signature(signature),
                    Err(reason) => {
                        session.fail(reason);
                    }
                }
            });
        }

        let keys = match self.load_keys() {
            Ok(keys) => Arc::new(keys),
            Err(reason) => {
                session.fail(reason);
                return;
            }
        };
        setup.drain().await;
        if session.is_failed() {
            return;
        }

        let digests = Arc::new(WorkerPool::gated("digests", cancel.clone()));
        let logs = Arc::new(WorkerPool::gated("logs", cancel));
        let scanner = Arc::new(LogScanner::new(
            Arc::clone(&ctx),
            RuleEngine::new(self.config.rules.clone()),
            Arc::clone(&logs),
        ));
        let walker = Arc::new(ChainWalker::new(
            Arc::clone(&ctx),
            keys,
            Arc::clone(&digests),
            scanner,
        ));

        for root in session.root_signatures() {
            walker.walk(root);
        }
        digests.open(self.config.pools.digest_workers);
        digests.drain().await;
        if session.is_failed() {
            return;
        }
        session.finish_task(TaskKind::ProcessDigests);

        session.enter(AuditPhase::ProcessingLogs);
        logs.open(self.config.pools.log_workers);
        logs.drain().await;
        session.finish_task(TaskKind::ProcessLogs);
    }

    fn load_keys(&self) -> Result<KeyTable, String> {
        let table = match &self.config.public_keys_path {
            Some(path) => KeyTable::from_file(path),
            None => KeyTable::bundled(),
        };
        table.map_err(|e| e.to_string())
    }
}

fn fail_with(session: &AuditSession, err: TrailwatchError) {
    match err {
        TrailwatchError::AuditFailed { reason } => {
            session.fail(reason);
        }
        TrailwatchError::Cancelled => {}
        other => {
            session.fail(other.to_string());
        }
    }
}

fn report(session: &AuditSession) -> AuditReport {
    let outcome = session.outcome().unwrap_or_else(|| AuditOutcome::Failed {
        reason: session.failure_reason().unwrap_or_default(),
    });
    AuditReport {
        run_id: session.run_id(),
        outcome,
        violations: session.violations(),
        deployments: session.deployments(),
        digests_processed: session.digests_processed(),
        logs_processed: session.logs_processed(),
        furthest_start_log_secs: session.furthest_start_log().as_secs(),
    }
}
