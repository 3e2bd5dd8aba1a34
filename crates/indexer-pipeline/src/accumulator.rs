//! In-memory staging of event mutations.
//!
//! Pending upserts are keyed by event identifier with last-write-wins
//! semantics, and pending deletes form a set. An identifier is never in
//! both: recording one side evicts it from the other.

use std::collections::HashMap;

use indexer_types::{ChangeBatch, EventRecord};

/// Pending changes not yet flushed to the handoff file.
///
/// Entries keep the position of their first insertion in the current
/// generation, so a flushed batch lists changes in arrival order.
#[derive(Debug, Default)]
pub struct ChangeAccumulator {
    upserts: HashMap<String, (u64, EventRecord)>,
    deletes: HashMap<String, u64>,
    next_seq: u64,
}

impl ChangeAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the latest representation of an event.
    pub fn record_upsert(&mut self, event: EventRecord) {
        self.deletes.remove(&event.id);
        match self.upserts.get_mut(&event.id) {
            Some((_, existing)) => *existing = event,
            None => {
                let seq = self.bump();
                self.upserts.insert(event.id.clone(), (seq, event));
            }
        }
    }

    /// Stage the removal of an event.
    pub fn record_delete(&mut self, id: &str) {
        self.upserts.remove(id);
        if !self.deletes.contains_key(id) {
            let seq = self.bump();
            self.deletes.insert(id.to_string(), seq);
        }
    }

    /// Check whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }

    /// Number of pending changes.
    pub fn len(&self) -> usize {
        self.upserts.len() + self.deletes.len()
    }

    /// Pending upsert for an identifier.
    pub fn upsert(&self, id: &str) -> Option<&EventRecord> {
        self.upserts.get(id).map(|(_, event)| event)
    }

    /// Whether a delete is pending for an identifier.
    pub fn is_deleted(&self, id: &str) -> bool {
        self.deletes.contains_key(id)
    }

    /// Build a batch from the pending changes without draining them.
    pub fn snapshot(&self) -> ChangeBatch {
        let mut upserts: Vec<_> = self.upserts.values().collect();
        upserts.sort_by_key(|(seq, _)| *seq);

        let mut deletes: Vec<_> = self.deletes.iter().collect();
        deletes.sort_by_key(|(_, seq)| **seq);

        ChangeBatch::new(
            upserts.into_iter().map(|(_, event)| event.clone()).collect(),
            deletes.into_iter().map(|(id, _)| id.clone()).collect(),
        )
    }

    /// Drop all pending changes.
    pub fn clear(&mut self) {
        self.upserts.clear();
        self.deletes.clear();
    }

    /// Merge a previously flushed batch back in.
    ///
    /// Only identifiers with no newer pending change are restored, so
    /// mutations recorded after the flush keep precedence. Returns the
    /// number of restored entries.
    pub fn restore(&mut self, batch: &ChangeBatch) -> usize {
        let mut restored = 0;
        for event in &batch.upserts {
            if !self.is_tracked(&event.id) {
                let seq = self.bump();
                self.upserts.insert(event.id.clone(), (seq, event.clone()));
                restored += 1;
            }
        }
        for id in &batch.deletes {
            if !self.is_tracked(id) {
                let seq = self.bump();
                self.deletes.insert(id.clone(), seq);
                restored += 1;
            }
        }
        restored
    }

    fn is_tracked(&self, id: &str) -> bool {
        self.upserts.contains_key(id) || self.deletes.contains_key(id)
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
