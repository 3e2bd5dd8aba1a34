//! Error types for the indexing pipeline.

use std::path::PathBuf;

use indexer_types::{Stage, StatusPhase};
use thiserror::Error;

/// Failure of a single stage invocation.
#[derive(Error, Debug)]
pub enum StageError {
    /// The executable could not be launched
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the launched process failed
    #[error("failed to wait on {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully
    #[error("{program} {}", describe_exit(.code))]
    Exit { program: String, code: Option<i32> },

    /// The process outlived its timeout and was killed
    #[error("{program} timed out after {timeout_ms} ms")]
    Timeout { program: String, timeout_ms: u64 },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {}", code),
        None => "was terminated by a signal".to_string(),
    }
}

impl StageError {
    /// Status phase this failure is reported under.
    pub fn phase(&self) -> StatusPhase {
        match self {
            StageError::Spawn { .. } => StatusPhase::Spawn,
            StageError::Wait { .. } | StageError::Exit { .. } | StageError::Timeout { .. } => {
                StatusPhase::Close
            }
        }
    }

    /// Exit code, when the process exited on its own.
    pub fn code(&self) -> Option<i32> {
        match self {
            StageError::Exit { code, .. } => *code,
            _ => None,
        }
    }
}

/// Terminal failure of a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage executable is missing; not retried
    #[error("{stage} executable not found at {}", .path.display())]
    MissingExecutable { stage: Stage, path: PathBuf },

    /// Every attempt failed
    #[error("pipeline failed after {attempts} attempt(s) in {stage} stage: {last}")]
    Exhausted {
        attempts: u32,
        stage: Stage,
        #[source]
        last: StageError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display() {
        let err = StageError::Exit {
            program: "build_model.py".to_string(),
            code: Some(2),
        };
        assert_eq!(err.to_string(), "build_model.py exited with code 2");

        let err = StageError::Exit {
            program: "ingest.py".to_string(),
            code: None,
        };
        assert_eq!(err.to_string(), "ingest.py was terminated by a signal");

        let err = StageError::Timeout {
            program: "ingest.py".to_string(),
            timeout_ms: 500,
        };
        assert_eq!(err.to_string(), "ingest.py timed out after 500 ms");
    }

    #[test]
    fn test_stage_error_classification() {
        let spawn = StageError::Spawn {
            program: "missing".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(spawn.phase(), StatusPhase::Spawn);
        assert_eq!(spawn.code(), None);

        let exit = StageError::Exit {
            program: "build".to_string(),
            code: Some(1),
        };
        assert_eq!(exit.phase(), StatusPhase::Close);
        assert_eq!(exit.code(), Some(1));

        let timeout = StageError::Timeout {
            program: "build".to_string(),
            timeout_ms: 10,
        };
        assert_eq!(timeout.phase(), StatusPhase::Close);
        assert_eq!(timeout.code(), None);
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::MissingExecutable {
            stage: Stage::Build,
            path: PathBuf::from("/srv/scripts/build_model.py"),
        };
        assert_eq!(
            err.to_string(),
            "build executable not found at /srv/scripts/build_model.py"
        );

        let err = PipelineError::Exhausted {
            attempts: 2,
            stage: Stage::Ingest,
            last: StageError::Exit {
                program: "ingest.py".to_string(),
                code: Some(1),
            },
        };
        assert!(err.to_string().contains("after 2 attempt(s)"));
        assert!(err.to_string().contains("ingest stage"));
    }
}
