//! Durable handoff of pending changes to the external stages.
//!
//! The batch is written to a single well-known file. Writes go to a
//! sibling temporary file that is then renamed over the target, so a
//! reader never observes a partially written batch.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use indexer_types::{ChangeBatch, IndexerError};

use crate::accumulator::ChangeAccumulator;

/// A batch that was written to disk.
#[derive(Debug, Clone)]
pub struct FlushedBatch {
    /// Where the batch was written
    pub path: PathBuf,
    /// The batch contents
    pub batch: ChangeBatch,
}

/// Writes change batches to the handoff file.
#[derive(Debug, Clone)]
pub struct HandoffWriter {
    path: PathBuf,
}

impl HandoffWriter {
    /// Create a writer targeting the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Handoff file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the pending changes and drain them.
    ///
    /// The accumulator is cleared only after the write succeeded. On
    /// failure the error is logged, the pending changes are left intact,
    /// and `None` is returned.
    pub fn flush(&self, pending: &mut ChangeAccumulator) -> Option<FlushedBatch> {
        let batch = pending.snapshot();
        match self.write(&batch) {
            Ok(()) => {
                pending.clear();
                info!(
                    path = %self.path.display(),
                    upserts = batch.upserts.len(),
                    deletes = batch.deletes.len(),
                    "Flushed pending changes"
                );
                Some(FlushedBatch {
                    path: self.path.clone(),
                    batch,
                })
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    pending = pending.len(),
                    "Could not write changes file, keeping pending changes"
                );
                None
            }
        }
    }

    /// Write a batch, replacing any previous one.
    pub fn write(&self, batch: &ChangeBatch) -> Result<(), IndexerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = batch.to_bytes()?;
        let tmp = self.tmp_path();
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(path = %self.path.display(), "Wrote changes file");
        Ok(())
    }

    /// Read the current batch back.
    pub fn read(&self) -> Result<ChangeBatch, IndexerError> {
        let bytes = fs::read(&self.path)?;
        ChangeBatch::from_bytes(&bytes)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
