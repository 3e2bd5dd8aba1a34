//! Execution of the external build and ingest stages.
//!
//! Stages are opaque executables. Success is exit code zero; anything else
//! (launch failure, nonzero exit, timeout) is a [`StageError`].

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use indexer_types::Stage;

use crate::error::StageError;

/// A fully resolved stage invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StageCommand {
    /// Which stage this invocation runs
    pub stage: Stage,
    /// Program to launch (the interpreter, or the script itself)
    pub program: PathBuf,
    /// Arguments passed to the program
    pub args: Vec<OsString>,
    /// Extra environment for the child
    pub envs: Vec<(String, String)>,
    /// Working directory for the child
    pub current_dir: Option<PathBuf>,
}

impl StageCommand {
    /// Program name used in logs and error messages.
    pub fn display_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Whether the argument list contains the given flag.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

/// Launches stage commands.
///
/// The production implementation spawns real processes; tests substitute
/// scripted executors.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run a stage to completion, bounded by `timeout` when given.
    async fn execute(
        &self,
        command: &StageCommand,
        timeout: Option<Duration>,
    ) -> Result<(), StageError>;
}

/// Runs stages as child processes.
///
/// Stdin is closed and stdout/stderr are inherited. The child is killed
/// when its timeout expires, and on drop.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

#[async_trait]
impl StageExecutor for ProcessExecutor {
    async fn execute(
        &self,
        command: &StageCommand,
        timeout: Option<Duration>,
    ) -> Result<(), StageError> {
        let program = command.display_name();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        info!(stage = %command.stage, program = %program, args = ?command.args, "Spawning stage");

        let mut child = cmd.spawn().map_err(|source| StageError::Spawn {
            program: program.clone(),
            source,
        })?;

        let status = match timeout {
            Some(limit) => {
                tokio::select! {
                    status = child.wait() => status,
                    _ = tokio::time::sleep(limit) => {
                        warn!(
                            stage = %command.stage,
                            program = %program,
                            timeout_ms = limit.as_millis() as u64,
                            "Stage timed out, killing"
                        );
                        if let Err(e) = child.kill().await {
                            warn!(program = %program, error = %e, "Failed to kill timed out stage");
                        }
                        return Err(StageError::Timeout {
                            program,
                            timeout_ms: limit.as_millis() as u64,
                        });
                    }
                }
            }
            None => child.wait().await,
        };

        let status = status.map_err(|source| StageError::Wait {
            program: program.clone(),
            source,
        })?;

        if status.success() {
            info!(stage = %command.stage, program = %program, "Stage completed");
            Ok(())
        } else {
            Err(StageError::Exit {
                program,
                code: status.code(),
            })
        }
    }
}
