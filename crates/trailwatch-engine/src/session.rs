//! Per-run shared state.
//!
//! One `AuditSession` is built for every call to `begin_audit` and shared by
//! every task of that run behind an `Arc`. Nothing in it outlives the run,
//! so a second audit on the same engine always starts clean.
//!
//! Locks are held only long enough to update a value; callbacks are invoked
//! with no lock held. The terminal phase is decided under the phase lock, so
//! a racing `fail` and `complete` agree on one outcome.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use trailwatch_contracts::keys::RegionRootSignature;
use trailwatch_contracts::record::ApiCall;
use trailwatch_contracts::violation::Violation;
use trailwatch_core::progress::{AuditTask, Task, TaskKind};
use trailwatch_policy::{DeploymentTracker, WalkPosition};

/// Where a run is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPhase {
    Idle,
    ResolvingContext,
    Downloading,
    ProcessingDigests,
    ProcessingLogs,
    Finished,
    Failed,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    Completed,
    Failed { reason: String },
}

pub type ProgressCallback = Arc<dyn Fn() + Send + Sync>;
pub type FinishedCallback = Box<dyn FnOnce(AuditOutcome) + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct AuditSession {
    run_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cancel: CancellationToken,

    phase: Mutex<AuditPhase>,
    violations: Mutex<Vec<Violation>>,
    deployments: Mutex<DeploymentTracker>,
    progress: Mutex<AuditTask>,
    root_signatures: Mutex<HashMap<String, RegionRootSignature>>,
    failure: OnceLock<String>,
    /// Seconds between now and the oldest root digest across regions.
    furthest_start_log: AtomicU64,
    digests_processed: AtomicU64,
    logs_processed: AtomicU64,

    on_progress: ProgressCallback,
    on_finished: Mutex<Option<FinishedCallback>>,
}

impl AuditSession {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        progress: AuditTask,
        on_progress: ProgressCallback,
        on_finished: FinishedCallback,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            start,
            end,
            cancel: CancellationToken::new(),
            phase: Mutex::new(AuditPhase::Idle),
            violations: Mutex::new(Vec::new()),
            deployments: Mutex::new(DeploymentTracker::default()),
            progress: Mutex::new(progress),
            root_signatures: Mutex::new(HashMap::new()),
            failure: OnceLock::new(),
            furthest_start_log: AtomicU64::new(0),
            digests_processed: AtomicU64::new(0),
            logs_processed: AtomicU64::new(0),
            on_progress,
            on_finished: Mutex::new(Some(on_finished)),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ── Phase ─────────────────────────────────────────────────────────────────

    pub fn phase(&self) -> AuditPhase {
        *lock(&self.phase)
    }

    /// Move to `phase` unless the run already ended.
    pub fn enter(&self, phase: AuditPhase) {
        {
            let mut current = lock(&self.phase);
            if matches!(*current, AuditPhase::Finished | AuditPhase::Failed) {
                return;
            }
            *current = phase;
        }
        info!(run_id = %self.run_id, phase = ?phase, "audit phase");
    }

    // ── Findings ──────────────────────────────────────────────────────────────

    pub fn record(&self, violation: Violation) {
        warn!(
            run_id = %self.run_id,
            violation = %violation.kind,
            path = violation.file_path.as_deref().unwrap_or("-"),
            "violation recorded"
        );
        lock(&self.violations).push(violation);
    }

    pub fn record_all(&self, violations: impl IntoIterator<Item = Violation>) {
        for violation in violations {
            self.record(violation);
        }
    }

    pub fn violations(&self) -> Vec<Violation> {
        lock(&self.violations).clone()
    }

    pub fn observe_deployment(&self, call: &ApiCall, position: WalkPosition) {
        lock(&self.deployments).observe(call, position);
    }

    pub fn deployments(&self) -> BTreeMap<String, String> {
        lock(&self.deployments).latest()
    }

    pub fn add_root_signature(&self, signature: RegionRootSignature) {
        lock(&self.root_signatures).insert(signature.region.clone(), signature);
    }

    /// Root signatures in region order.
    pub fn root_signatures(&self) -> Vec<RegionRootSignature> {
        let mut roots: Vec<_> = lock(&self.root_signatures).values().cloned().collect();
        roots.sort_by(|a, b| a.region.cmp(&b.region));
        roots
    }

    /// Track how far back the newest digest of a region reaches.
    pub fn note_root_digest(&self, end_time: DateTime<Utc>) {
        let age = (Utc::now() - end_time).num_seconds().unsigned_abs();
        self.furthest_start_log.fetch_max(age, Ordering::Relaxed);
    }

    /// Age of the stalest region's newest digest.
    pub fn furthest_start_log(&self) -> Duration {
        Duration::from_secs(self.furthest_start_log.load(Ordering::Relaxed))
    }

    pub fn count_digest(&self) {
        self.digests_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_log(&self) {
        self.logs_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn digests_processed(&self) -> u64 {
        self.digests_processed.load(Ordering::Relaxed)
    }

    pub fn logs_processed(&self) -> u64 {
        self.logs_processed.load(Ordering::Relaxed)
    }

    // ── Progress ──────────────────────────────────────────────────────────────

    /// Apply `update` to one stage, then notify the progress listener.
    pub fn update_task(&self, kind: TaskKind, update: impl FnOnce(&mut Task)) {
        {
            let mut progress = lock(&self.progress);
            if let Some(task) = progress.task_mut(kind) {
                update(task);
            }
        }
        self.notify();
    }

    pub fn finish_task(&self, kind: TaskKind) {
        self.update_task(kind, |t| t.mark_finished());
    }

    /// Monotonic percent complete for this run.
    pub fn percent_complete(&self) -> f64 {
        lock(&self.progress).reported_percent()
    }

    pub fn current_task_name(&self) -> Option<&'static str> {
        lock(&self.progress).current_task().map(|t| t.name())
    }

    pub fn notify(&self) {
        (self.on_progress)();
    }

    // ── Termination ───────────────────────────────────────────────────────────

    pub fn is_failed(&self) -> bool {
        self.failure.get().is_some()
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.failure.get().cloned()
    }

    /// Stop the run for `reason`.
    ///
    /// The first reason wins; later calls, and calls after the run finished,
    /// are ignored and return false. A successful call cancels pool work and
    /// fires the finished callback.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        {
            let mut phase = lock(&self.phase);
            if *phase == AuditPhase::Finished || self.failure.set(reason.clone()).is_err() {
                return false;
            }
            *phase = AuditPhase::Failed;
        }

        error!(run_id = %self.run_id, reason = %reason, "audit failed");
        self.cancel.cancel();
        lock(&self.progress).finish_all();
        self.notify();
        self.fire_finished(AuditOutcome::Failed { reason });
        true
    }

    /// Close a run that was not failed.
    pub fn complete(&self) {
        {
            let mut phase = lock(&self.phase);
            if matches!(*phase, AuditPhase::Finished | AuditPhase::Failed) {
                return;
            }
            *phase = AuditPhase::Finished;
        }
        lock(&self.progress).finish_all();
        self.notify();
        info!(run_id = %self.run_id, "audit finished");
        self.fire_finished(AuditOutcome::Completed);
    }

    pub fn outcome(&self) -> Option<AuditOutcome> {
        match self.phase() {
            AuditPhase::Finished => Some(AuditOutcome::Completed),
            AuditPhase::Failed => self
                .failure_reason()
                .map(|reason| AuditOutcome::Failed { reason }),
            _ => None,
        }
    }

    fn fire_finished(&self, outcome: AuditOutcome) {
        let callback = lock(&self.on_finished).take();
        if let Some(callback) = callback {
            callback(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use trailwatch_contracts::violation::ViolationKind;

    use super::*;
    use crate::config::WeightConfig;

    fn session(finished: Arc<Mutex<Vec<AuditOutcome>>>) -> AuditSession {
        AuditSession::new(
            Utc::now(),
            Utc::now(),
            WeightConfig::default().audit_task(),
            Arc::new(|| {}),
            Box::new(move |outcome| finished.lock().unwrap().push(outcome)),
        )
    }

    /// The first failure reason sticks and the callback fires once.
    #[test]
    fn test_first_failure_wins() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let s = session(Arc::clone(&finished));

        assert!(s.fail("first"));
        assert!(!s.fail("second"));
        s.complete();

        assert_eq!(s.failure_reason().as_deref(), Some("first"));
        assert_eq!(s.phase(), AuditPhase::Failed);
        assert!(s.cancel_token().is_cancelled());
        assert_eq!(s.percent_complete(), 100.0);
        assert_eq!(
            *finished.lock().unwrap(),
            vec![AuditOutcome::Failed {
                reason: "first".to_string()
            }]
        );
    }

    #[test]
    fn test_complete_fires_once() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let s = session(Arc::clone(&finished));

        s.enter(AuditPhase::ProcessingLogs);
        s.complete();
        s.complete();
        assert!(!s.fail("too late"));

        assert_eq!(s.outcome(), Some(AuditOutcome::Completed));
        assert_eq!(finished.lock().unwrap().len(), 1);
    }

    /// A failure racing completion leaves one outcome that every accessor
    /// and the finished callback agree on.
    #[test]
    fn test_fail_and_complete_race() {
        for round in 0..200 {
            let finished = Arc::new(Mutex::new(Vec::new()));
            let s = session(Arc::clone(&finished));
            s.enter(AuditPhase::ProcessingLogs);
            let barrier = std::sync::Barrier::new(2);

            let failed = std::thread::scope(|scope| {
                let failing = scope.spawn(|| {
                    barrier.wait();
                    s.fail("cancelled")
                });
                barrier.wait();
                s.complete();
                failing.join().unwrap()
            });

            let fired = finished.lock().unwrap().clone();
            assert_eq!(fired.len(), 1, "round {round}");
            let outcome = s.outcome().unwrap();
            assert_eq!(fired[0], outcome, "round {round}");
            if failed {
                assert_eq!(s.phase(), AuditPhase::Failed, "round {round}");
                assert_eq!(s.failure_reason().as_deref(), Some("cancelled"));
            } else {
                assert_eq!(outcome, AuditOutcome::Completed, "round {round}");
                assert_eq!(s.failure_reason(), None, "round {round}");
            }
        }
    }

    #[test]
    fn test_enter_after_end_ignored() {
        let s = session(Arc::new(Mutex::new(Vec::new())));
        s.complete();
        s.enter(AuditPhase::ProcessingDigests);
        assert_eq!(s.phase(), AuditPhase::Finished);
    }

    #[test]
    fn test_progress_updates_notify() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let s = AuditSession::new(
            Utc::now(),
            Utc::now(),
            WeightConfig::default().audit_task(),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(|_| {}),
        );

        s.update_task(TaskKind::CalculateDownload, |t| t.add_subtasks(2));
        s.update_task(TaskKind::CalculateDownload, |t| t.complete_subtasks(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(s.current_task_name(), Some("Calculating download size"));
        assert!((s.percent_complete() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_violations_keep_insertion_order() {
        let s = session(Arc::new(Mutex::new(Vec::new())));
        s.record(Violation::integrity(ViolationKind::WrongSha256, Some("us-east-1"), "/a"));
        s.record(Violation::integrity(ViolationKind::MissingLogFile, None, "/b"));

        let kinds: Vec<_> = s.violations().into_iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![ViolationKind::WrongSha256, ViolationKind::MissingLogFile]);
    }

    #[test]
    fn test_furthest_start_log_keeps_maximum() {
        let s = session(Arc::new(Mutex::new(Vec::new())));
        s.note_root_digest(Utc::now() - chrono::Duration::days(3));
        s.note_root_digest(Utc::now() - chrono::Duration::days(1));

        let secs = s.furthest_start_log().as_secs() as i64;
        assert!((secs - 3 * 86_400).abs() <= 2, "got {secs}s");
    }
}
