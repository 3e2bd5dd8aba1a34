//! Handoff batch written before each pipeline run.
//!
//! A batch is one flushed snapshot of the pending changes. It is consumed
//! by the external build and ingest stages, which receive its path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::event::EventRecord;

/// One flushed snapshot of pending upserts and deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Full records to insert or update
    #[serde(default)]
    pub upserts: Vec<EventRecord>,

    /// Identifiers to remove
    #[serde(default)]
    pub deletes: Vec<String>,

    /// When the batch was serialized
    pub queued_at: DateTime<Utc>,
}

impl ChangeBatch {
    /// Create a batch stamped with the current time.
    pub fn new(upserts: Vec<EventRecord>, deletes: Vec<String>) -> Self {
        Self {
            upserts,
            deletes,
            queued_at: Utc::now(),
        }
    }

    /// Check whether the batch carries no changes.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }

    /// Total number of changes in the batch.
    pub fn len(&self) -> usize {
        self.upserts.len() + self.deletes.len()
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
