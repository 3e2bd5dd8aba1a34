//! Debounced triggering and run exclusion for the event indexer.
//!
//! This crate provides the two scheduling primitives the coordinator is
//! built on:
//!
//! - [`Debouncer`]: coalesces bursts of notifications into a single
//!   delayed trigger, restarting the delay on every call
//! - [`OverlapGuard`]: lets at most one pipeline run execute at a time;
//!   a trigger that finds a run in flight is skipped, not queued
//!
//! # Example
//!
//! ```ignore
//! use indexer_scheduler::{Debouncer, OverlapGuard};
//!
//! let debouncer = Debouncer::new()?;
//! let guard = Arc::new(OverlapGuard::new());
//!
//! debouncer.schedule(Duration::from_millis(500), move || async move {
//!     if let Some(_run) = guard.try_acquire() {
//!         run_pipeline().await;
//!     }
//! });
//! ```

mod debounce;
mod error;
mod overlap;

pub use debounce::Debouncer;
pub use error::SchedulerError;
pub use overlap::{OverlapGuard, RunGuard};
