//! Debounced triggering.
//!
//! Every call to [`Debouncer::schedule`] cancels the trigger scheduled by
//! the previous call and starts a new delay, so the job fires `delay` after
//! the *last* call in a burst. Cancellation only covers the waiting period:
//! once a trigger has fired, its job runs to completion.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::SchedulerError;

/// Cancellable delayed trigger.
pub struct Debouncer {
    handle: Handle,
    pending: Mutex<Option<CancellationToken>>,
    scheduled: AtomicU64,
    fired: Arc<AtomicU64>,
}

impl Debouncer {
    /// Create a debouncer bound to the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NoRuntime` when called outside a runtime.
    pub fn new() -> Result<Self, SchedulerError> {
        Ok(Self::with_handle(Handle::try_current()?))
    }

    /// Create a debouncer that spawns its timers on the given runtime.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            pending: Mutex::new(None),
            scheduled: AtomicU64::new(0),
            fired: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule `job` to run after `delay`, replacing any pending trigger.
    ///
    /// Never blocks; callable from synchronous code. A zero delay fires on
    /// the next runtime tick.
    pub fn schedule<F, Fut>(&self, delay: Duration, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let token = CancellationToken::new();

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        self.scheduled.fetch_add(1, Ordering::SeqCst);
        debug!(delay_ms = delay.as_millis() as u64, "Trigger scheduled");

        let fired = self.fired.clone();
        self.handle.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Trigger superseded");
                }
                _ = tokio::time::sleep_until(deadline) => {
                    fired.fetch_add(1, Ordering::SeqCst);
                    job().await;
                }
            }
        });
    }

    /// Cancel the pending trigger, if any. A job that already fired keeps running.
    pub fn cancel(&self) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(token) = pending {
            token.cancel();
        }
    }

    /// Number of `schedule` calls so far.
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// Number of triggers that fired.
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_job(counter: &Arc<AtomicU32>) -> impl FnOnce() -> std::future::Ready<()> {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        assert!(matches!(Debouncer::new(), Err(SchedulerError::NoRuntime(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once_after_last_call() {
        let debouncer = Debouncer::new().unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let delay = Duration::from_millis(100);

        for _ in 0..5 {
            debouncer.schedule(delay, counting_job(&counter));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        // 150ms since the first call, 30ms since the last
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.scheduled_count(), 5);
        assert_eq!(debouncer.fired_count(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_fires_next_tick() {
        let debouncer = Debouncer::new().unwrap();
        let counter = Arc::new(AtomicU32::new(0));

        debouncer.schedule(Duration::ZERO, counting_job(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_trigger() {
        let debouncer = Debouncer::new().unwrap();
        let counter = Arc::new(AtomicU32::new(0));

        debouncer.schedule(Duration::from_millis(50), counting_job(&counter));
        debouncer.cancel();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(debouncer.fired_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_does_not_cancel_fired_job() {
        let debouncer = Debouncer::new().unwrap();
        let finished = Arc::new(AtomicU32::new(0));

        let done = finished.clone();
        debouncer.schedule(Duration::ZERO, move || async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            done.fetch_add(1, Ordering::SeqCst);
        });

        // let the first trigger fire and start its long job
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(debouncer.fired_count(), 1);

        debouncer.schedule(Duration::from_millis(10), counting_job(&finished));
        debouncer.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
