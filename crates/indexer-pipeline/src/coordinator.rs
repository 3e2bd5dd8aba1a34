//! The indexing coordinator.
//!
//! Owns the pending changes, the debounce timer and the run guard, and
//! drives the [`PipelineRunner`]. Notifications are synchronous and never
//! fail; runs happen on the Tokio runtime the coordinator was built in.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use indexer_scheduler::{Debouncer, OverlapGuard, SchedulerError};
use indexer_types::{ChangeBatch, EventRecord, IndexerError, PipelineStatus, Settings};

use crate::accumulator::ChangeAccumulator;
use crate::error::PipelineError;
use crate::runner::{PipelineRunner, RunOptions, RunReport};
use crate::stage::{ProcessExecutor, StageExecutor};

/// Outcome of a manual rebuild request.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The pipeline ran and succeeded
    Completed(RunReport),
    /// Another run was active; nothing was started
    Skipped,
}

struct Inner {
    pending: Mutex<ChangeAccumulator>,
    guard: OverlapGuard,
    debouncer: Debouncer,
    runner: PipelineRunner,
    options: RunOptions,
    debounce: Duration,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, ChangeAccumulator> {
        self.pending.lock().unwrap_or_else(|poisoned| {
            warn!("Pending changes lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    async fn run_debounced(&self) {
        let Some(_guard) = self.guard.try_acquire() else {
            info!(pending = self.pending().len(), "Run skipped: already running");
            return;
        };

        if let Err(e) = self.runner.run(&self.pending, &self.options).await {
            debug!(error = %e, "Debounced run ended in failure");
        }
    }
}

/// Single-instance coordinator for incremental index rebuilds.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct IndexCoordinator {
    inner: Arc<Inner>,
}

impl IndexCoordinator {
    /// Create a coordinator that runs stages as child processes.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NoRuntime` when called outside a Tokio runtime.
    pub fn new(settings: &Settings) -> Result<Self, SchedulerError> {
        Self::with_executor(settings, Arc::new(ProcessExecutor))
    }

    /// Create a coordinator with a custom stage executor.
    pub fn with_executor(
        settings: &Settings,
        executor: Arc<dyn StageExecutor>,
    ) -> Result<Self, SchedulerError> {
        let debouncer = Debouncer::new()?;
        let runner = PipelineRunner::from_settings(settings, executor);

        info!(
            changes_file = %runner.handoff().path().display(),
            debounce_ms = settings.debounce_ms,
            timeout_ms = settings.timeout_ms,
            max_attempts = settings.attempts(),
            "Index coordinator ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(ChangeAccumulator::new()),
                guard: OverlapGuard::new(),
                debouncer,
                runner,
                options: RunOptions::from_settings(settings),
                debounce: settings.debounce(),
            }),
        })
    }

    /// Record a created or updated event and schedule a run.
    pub fn notify_upsert(&self, event: EventRecord) {
        debug!(id = %event.id, "Upsert recorded");
        self.inner.pending().record_upsert(event);
        self.schedule(self.inner.debounce);
    }

    /// Record an event given as raw JSON.
    ///
    /// Values without a usable identifier are logged and ignored.
    pub fn notify_upsert_value(&self, value: Value) {
        match EventRecord::from_value(value) {
            Ok(event) => self.notify_upsert(event),
            Err(e) => warn!(error = %e, "Ignoring upsert notification"),
        }
    }

    /// Record a deleted event and schedule a run.
    pub fn notify_delete(&self, id: &str) {
        if id.is_empty() {
            warn!("Ignoring delete notification without an identifier");
            return;
        }
        debug!(id, "Delete recorded");
        self.inner.pending().record_delete(id);
        self.schedule(self.inner.debounce);
    }

    /// (Re)start the debounce timer.
    ///
    /// When it fires and no run is active, pending changes are flushed and
    /// the pipeline runs. If a run is active the trigger is dropped.
    pub fn schedule(&self, delay: Duration) {
        let inner = Arc::clone(&self.inner);
        self.inner
            .debouncer
            .schedule(delay, move || async move { inner.run_debounced().await });
    }

    /// Run the pipeline immediately and wait for its outcome.
    ///
    /// Returns [`RunOutcome::Skipped`] without doing anything when a run is
    /// already active.
    pub async fn trigger_rebuild_now(&self) -> Result<RunOutcome, PipelineError> {
        let Some(_guard) = self.inner.guard.try_acquire() else {
            info!("Manual rebuild skipped: already running");
            return Ok(RunOutcome::Skipped);
        };

        info!(pending = self.pending_len(), "Manual rebuild requested");
        self.inner
            .runner
            .run(&self.inner.pending, &self.inner.options)
            .await
            .map(RunOutcome::Completed)
    }

    /// Write the pending changes to the handoff file and drain them.
    ///
    /// Writes even when nothing is pending. Returns `None` when the write
    /// failed (changes are kept) or a run is active.
    pub fn flush(&self) -> Option<PathBuf> {
        let Some(_guard) = self.inner.guard.try_acquire() else {
            warn!("Flush refused: a run is using the changes file");
            return None;
        };
        let mut pending = self.inner.pending();
        self.inner
            .runner
            .handoff()
            .flush(&mut pending)
            .map(|flushed| flushed.path)
    }

    /// Latest recorded pipeline outcome, `None` before the first run.
    pub fn last_status(&self) -> Result<Option<PipelineStatus>, IndexerError> {
        self.inner.runner.status().read()
    }

    /// Whether a pipeline run is in flight.
    pub fn is_running(&self) -> bool {
        self.inner.guard.is_running()
    }

    /// Number of pending changes.
    pub fn pending_len(&self) -> usize {
        self.inner.pending().len()
    }

    /// Copy of the pending changes, without draining them.
    pub fn pending_snapshot(&self) -> ChangeBatch {
        self.inner.pending().snapshot()
    }

    /// Number of triggers dropped because a run was active.
    pub fn skipped_runs(&self) -> u64 {
        self.inner.guard.skipped_count()
    }

    /// Wait until no run is in flight.
    pub async fn wait_idle(&self) {
        self.inner.guard.wait_idle().await;
    }

    /// Cancel the pending debounce timer. An in-flight run finishes.
    pub fn shutdown(&self) {
        self.inner.debouncer.cancel();
        info!(pending = self.pending_len(), "Index coordinator stopped");
    }
}
