//! Mutual exclusion for pipeline runs.
//!
//! Only one pipeline run may be in flight at a time. A trigger that arrives
//! while a run is active is skipped entirely: it is neither queued nor
//! retried, because its changes are still pending and the next trigger
//! will pick them up.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Guard tracking whether a pipeline run is in flight.
///
/// Acquisition is lock-free and returns a [`RunGuard`] that clears the
/// running flag when dropped, on every exit path including panics.
#[derive(Debug, Default)]
pub struct OverlapGuard {
    is_running: Arc<AtomicBool>,
    idle: Arc<Notify>,
    skipped: AtomicU64,
}

impl OverlapGuard {
    /// Create a guard with no run in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to start a run.
    ///
    /// Returns `None` when a run is already active; the skip is counted.
    pub fn try_acquire(&self) -> Option<RunGuard> {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(RunGuard {
                flag: self.is_running.clone(),
                idle: self.idle.clone(),
            })
        } else {
            self.skipped.fetch_add(1, Ordering::SeqCst);
            None
        }
    }

    /// Check if a run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Wait until no run is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let released = self.idle.notified();
            tokio::pin!(released);
            // register before checking so a release in between is not missed
            released.as_mut().enable();
            if !self.is_running() {
                return;
            }
            released.await;
        }
    }

    /// Number of acquisitions refused because a run was active.
    pub fn skipped_count(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }
}

/// RAII guard that releases the running flag when dropped.
#[derive(Debug)]
pub struct RunGuard {
    flag: Arc<AtomicBool>,
    idle: Arc<Notify>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.idle.notify_waiters();
    }
}
