//! Two-stage pipeline execution with bounded retries.
//!
//! A run flushes the pending changes to the handoff file, then invokes the
//! build stage followed by the ingest stage. Ingest only runs after a
//! successful build. A failed attempt is retried from the build stage
//! until `max_attempts` is exhausted; the terminal outcome is written to
//! the status file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use tracing::{debug, error, info, warn};

use indexer_types::{PipelineStatus, Settings, Stage};

use crate::accumulator::ChangeAccumulator;
use crate::error::{PipelineError, StageError};
use crate::handoff::{FlushedBatch, HandoffWriter};
use crate::stage::{StageCommand, StageExecutor};
use crate::status::StatusRecorder;

/// Per-run execution controls.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Per-stage timeout (`None` = unbounded)
    pub timeout: Option<Duration>,
    /// Attempts per run
    pub max_attempts: u32,
    /// Initial delay between failed attempts
    pub retry_backoff: Duration,
    /// Merge the batch back into the pending changes when every attempt fails
    pub requeue_on_failure: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30 * 60)),
            max_attempts: 1,
            retry_backoff: Duration::ZERO,
            requeue_on_failure: true,
        }
    }
}

impl RunOptions {
    /// Build run options from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: settings.timeout(),
            max_attempts: settings.attempts(),
            retry_backoff: settings.retry_backoff(),
            requeue_on_failure: settings.requeue_on_failure,
        }
    }

    /// Set the per-stage timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial retry delay.
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    /// Set whether failed batches are requeued.
    pub fn with_requeue_on_failure(mut self, requeue: bool) -> Self {
        self.requeue_on_failure = requeue;
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Attempts used, including the successful one
    pub attempts: u32,
    /// Handoff file passed to the stages (`None` = full rebuild)
    pub changes_file: Option<PathBuf>,
    /// Number of changes in the flushed batch
    pub batch_len: usize,
}

/// Where the stage executables live and how they are launched.
#[derive(Debug, Clone)]
pub struct StageLayout {
    /// Build-stage executable
    pub build_script: PathBuf,
    /// Ingest-stage executable
    pub ingest_script: PathBuf,
    /// Interpreter to launch the scripts with (`None` = direct execution)
    pub interpreter: Option<PathBuf>,
    /// Working directory for the stages
    pub working_dir: Option<PathBuf>,
}

impl StageLayout {
    /// Resolve the stage layout from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            build_script: settings.build_script_path(),
            ingest_script: settings.ingest_script_path(),
            interpreter: settings.resolved_interpreter(),
            working_dir: Some(settings.root_dir()),
        }
    }

    fn script(&self, stage: Stage) -> &Path {
        match stage {
            Stage::Build => &self.build_script,
            Stage::Ingest => &self.ingest_script,
        }
    }
}

/// Executes the build/ingest sequence.
pub struct PipelineRunner {
    executor: Arc<dyn StageExecutor>,
    layout: StageLayout,
    handoff: HandoffWriter,
    status: StatusRecorder,
}

impl PipelineRunner {
    /// Create a runner.
    pub fn new(
        executor: Arc<dyn StageExecutor>,
        layout: StageLayout,
        handoff: HandoffWriter,
        status: StatusRecorder,
    ) -> Self {
        Self {
            executor,
            layout,
            handoff,
            status,
        }
    }

    /// Create a runner from settings.
    pub fn from_settings(settings: &Settings, executor: Arc<dyn StageExecutor>) -> Self {
        Self::new(
            executor,
            StageLayout::from_settings(settings),
            HandoffWriter::new(settings.changes_file_path()),
            StatusRecorder::new(settings.status_file_path()),
        )
    }

    /// Handoff writer used by this runner.
    pub fn handoff(&self) -> &HandoffWriter {
        &self.handoff
    }

    /// Status recorder used by this runner.
    pub fn status(&self) -> &StatusRecorder {
        &self.status
    }

    /// Check that both stage executables exist.
    pub fn check_executables(&self) -> Result<(), PipelineError> {
        for stage in [Stage::Build, Stage::Ingest] {
            let path = self.layout.script(stage);
            if !path.exists() {
                return Err(PipelineError::MissingExecutable {
                    stage,
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    /// Build the invocation for a stage.
    pub fn stage_command(
        &self,
        stage: Stage,
        changes_file: Option<&Path>,
        timeout: Option<Duration>,
    ) -> StageCommand {
        let script = self.layout.script(stage);

        let (program, mut args): (PathBuf, Vec<OsString>) = match &self.layout.interpreter {
            Some(interpreter) => (interpreter.clone(), vec![script.as_os_str().to_os_string()]),
            None => (script.to_path_buf(), Vec::new()),
        };

        args.push(match stage {
            Stage::Build => "--rebuild".into(),
            Stage::Ingest => "--ingest-all".into(),
        });
        if let Some(file) = changes_file {
            args.push("--changes-file".into());
            args.push(file.as_os_str().to_os_string());
        }

        let changes_dir = self
            .handoff
            .path()
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let envs = vec![
            (
                "CHANGES_FILE".to_string(),
                changes_file
                    .map(|f| f.display().to_string())
                    .unwrap_or_default(),
            ),
            (
                "INDEXER_BUILD_SCRIPT".to_string(),
                self.layout.build_script.display().to_string(),
            ),
            (
                "INDEXER_INGEST_SCRIPT".to_string(),
                self.layout.ingest_script.display().to_string(),
            ),
            (
                "INDEXER_TIMEOUT_MS".to_string(),
                timeout.map(|t| t.as_millis()).unwrap_or(0).to_string(),
            ),
            ("INDEXER_CHANGES_DIR".to_string(), changes_dir),
        ];

        StageCommand {
            stage,
            program,
            args,
            envs,
            current_dir: self.layout.working_dir.clone(),
        }
    }

    /// Execute one pipeline run.
    ///
    /// The caller must hold the run guard for the whole call. Pending
    /// changes are flushed only when there are some; an empty accumulator
    /// runs the stages in full-rebuild mode.
    pub async fn run(
        &self,
        pending: &Mutex<ChangeAccumulator>,
        options: &RunOptions,
    ) -> Result<RunReport, PipelineError> {
        if let Err(e) = self.check_executables() {
            error!(error = %e, "Stage executable missing, aborting run");
            self.status.write(PipelineStatus::failure(e.to_string()));
            return Err(e);
        }

        debug!(
            build = %self.layout.build_script.display(),
            ingest = %self.layout.ingest_script.display(),
            interpreter = ?self.layout.interpreter,
            "Pipeline configuration"
        );

        let flushed = {
            let mut pending = pending.lock().unwrap_or_else(|p| p.into_inner());
            if pending.is_empty() {
                None
            } else {
                self.handoff.flush(&mut pending)
            }
        };
        let changes_file = flushed.as_ref().map(|f| f.path.clone());
        let batch_len = flushed.as_ref().map(|f| f.batch.len()).unwrap_or(0);

        let max_attempts = options.max_attempts.max(1);
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(options.retry_backoff)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(attempt, max_attempts, "Pipeline attempt");

            match self.attempt(changes_file.as_deref(), options.timeout).await {
                Ok(()) => {
                    self.status.write(PipelineStatus::success(
                        attempt,
                        changes_file.as_ref().map(|p| p.display().to_string()),
                    ));
                    info!(attempts = attempt, batch_len, "Index rebuild and ingest complete");
                    return Ok(RunReport {
                        attempts: attempt,
                        changes_file,
                        batch_len,
                    });
                }
                Err((stage, e)) => {
                    warn!(attempt, stage = %stage, error = %e, "Pipeline attempt failed");
                    if attempt >= max_attempts {
                        return Err(self.fail(stage, e, attempt, flushed, pending, options));
                    }
                }
            }

            if let Some(delay) = backoff.next_backoff().filter(|d| !d.is_zero()) {
                debug!(retry_in_ms = delay.as_millis() as u64, "Waiting before retry");
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn attempt(
        &self,
        changes_file: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<(), (Stage, StageError)> {
        for stage in [Stage::Build, Stage::Ingest] {
            let command = self.stage_command(stage, changes_file, timeout);
            self.executor
                .execute(&command, timeout)
                .await
                .map_err(|e| (stage, e))?;
        }
        Ok(())
    }

    fn fail(
        &self,
        stage: Stage,
        last: StageError,
        attempts: u32,
        flushed: Option<FlushedBatch>,
        pending: &Mutex<ChangeAccumulator>,
        options: &RunOptions,
    ) -> PipelineError {
        self.status.write(
            PipelineStatus::failure(last.to_string())
                .with_phase(last.phase())
                .with_stage(stage)
                .with_code(last.code())
                .with_attempts(attempts)
                .with_changes_file(flushed.as_ref().map(|f| f.path.display().to_string())),
        );

        if options.requeue_on_failure {
            if let Some(flushed) = flushed {
                let restored = pending
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .restore(&flushed.batch);
                info!(restored, "Requeued changes from failed run");
            }
        }

        let err = PipelineError::Exhausted {
            attempts,
            stage,
            last,
        };
        error!(error = %err, "Index pipeline failed");
        err
    }
}
