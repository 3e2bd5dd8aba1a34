//! Outcome record of the most recent pipeline run.
//!
//! Only the latest run is kept; every terminal outcome overwrites the
//! previous record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Where in process handling a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPhase {
    /// The executable could not be launched
    Spawn,
    /// The process exited unsuccessfully or was killed on timeout
    Close,
}

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Builds the index from the handoff batch
    Build,
    /// Loads the built index into the serving store
    Ingest,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Build => write!(f, "build"),
            Stage::Ingest => write!(f, "ingest"),
        }
    }
}

/// Status of the most recent pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Whether the run succeeded
    pub ok: bool,

    /// Failure phase (absent on success and for configuration errors)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<StatusPhase>,

    /// Stage that failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,

    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Exit code of the failed process, when it exited on its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,

    /// Attempts used by the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// Handoff file the run consumed, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes_file: Option<String>,

    /// When the status was written
    pub at: DateTime<Utc>,
}

impl PipelineStatus {
    /// Status for a successful run.
    pub fn success(attempts: u32, changes_file: Option<String>) -> Self {
        Self {
            ok: true,
            phase: None,
            stage: None,
            error: None,
            code: None,
            attempts: Some(attempts),
            changes_file,
            at: Utc::now(),
        }
    }

    /// Status for a failed run.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            phase: None,
            stage: None,
            error: Some(error.into()),
            code: None,
            attempts: None,
            changes_file: None,
            at: Utc::now(),
        }
    }

    /// Set the failure phase.
    pub fn with_phase(mut self, phase: StatusPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Set the failed stage.
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Set the exit code.
    pub fn with_code(mut self, code: Option<i32>) -> Self {
        self.code = code;
        self
    }

    /// Set the attempt count.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Set the handoff file reference.
    pub fn with_changes_file(mut self, changes_file: Option<String>) -> Self {
        self.changes_file = changes_file;
        self
    }

    /// Serialize to pretty-printed JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexerError> {
        serde_json::to_vec_pretty(self).map_err(IndexerError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexerError> {
        serde_json::from_slice(bytes).map_err(IndexerError::from)
    }
}
