//! Bounded, gateable worker pools.
//!
//! A `WorkerPool` is a semaphore plus a task tracker. Every unit of work
//! holds one permit while it runs, so the permit count is the pool's
//! concurrency. A pool created with [`WorkerPool::gated`] starts with zero
//! permits: work can be queued but nothing runs until [`WorkerPool::open`]
//! raises the bound. The audit uses this to hold chain walking until every
//! signing key and root signature is in place, and to hold log scanning
//! until every digest has been verified.
//!
//! All pools of one run share a `CancellationToken`. Cancelling it drops
//! queued work and aborts running futures at their next await point.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};

pub struct WorkerPool {
    name: &'static str,
    gate: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// A pool that runs up to `workers` units at once.
    pub fn bounded(name: &'static str, workers: usize, cancel: CancellationToken) -> Self {
        Self {
            name,
            gate: Arc::new(Semaphore::new(workers)),
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    /// A pool that queues work but runs nothing until opened.
    pub fn gated(name: &'static str, cancel: CancellationToken) -> Self {
        Self::bounded(name, 0, cancel)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Raise the concurrency bound by `workers`.
    pub fn open(&self, workers: usize) {
        debug!(pool = self.name, workers, "opening pool gate");
        self.gate.add_permits(workers);
    }

    /// Queue `work` to run under one permit.
    pub fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let gate = Arc::clone(&self.gate);
        let cancel = self.cancel.clone();
        let name = self.name;

        self.tracker.spawn(async move {
            let Some(_permit) = acquire(gate, &cancel).await else {
                debug!(pool = name, "queued work dropped by cancellation");
                return;
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => debug!(pool = name, "running work cancelled"),
                _ = work => {}
            }
        });
    }

    /// Track `work` without gating it.
    ///
    /// For work that takes permits itself, one per step, via
    /// [`WorkerPool::permit`].
    pub fn track<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = work => {}
            }
        });
    }

    /// Wait for one permit. `None` once the run is cancelled.
    pub async fn permit(&self) -> Option<OwnedSemaphorePermit> {
        acquire(Arc::clone(&self.gate), &self.cancel).await
    }

    /// Stop accepting the idea of more work and wait until every tracked
    /// unit has finished or been dropped.
    ///
    /// Work spawned by other units while draining is still awaited.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        debug!(pool = self.name, "pool drained");
    }
}

async fn acquire(gate: Arc<Semaphore>, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = gate.acquire_owned() => permit.ok(),
    }
}

/// Sleep for `duration`, returning early with `Cancelled` if the token fires.
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> TrailwatchResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TrailwatchError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
