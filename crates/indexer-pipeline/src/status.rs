//! Best-effort persistence of the latest pipeline outcome.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use indexer_types::{IndexerError, PipelineStatus};

/// Reads and writes the status file.
#[derive(Debug, Clone)]
pub struct StatusRecorder {
    path: PathBuf,
}

impl StatusRecorder {
    /// Create a recorder for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Status file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the status file, stamping the record with the current time.
    ///
    /// Filesystem errors are logged and swallowed.
    pub fn write(&self, status: PipelineStatus) {
        let status = PipelineStatus {
            at: Utc::now(),
            ..status
        };
        if let Err(e) = self.try_write(&status) {
            warn!(path = %self.path.display(), error = %e, "Could not write status file");
        } else {
            debug!(path = %self.path.display(), ok = status.ok, "Status written");
        }
    }

    fn try_write(&self, status: &PipelineStatus) -> Result<(), IndexerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, status.to_bytes()?)?;
        Ok(())
    }

    /// Read the latest status.
    ///
    /// Returns `Ok(None)` when no run has recorded a status yet.
    pub fn read(&self) -> Result<Option<PipelineStatus>, IndexerError> {
        match fs::read(&self.path) {
            Ok(bytes) => PipelineStatus::from_bytes(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
