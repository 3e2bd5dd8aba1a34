//! Incremental index rebuild pipeline for the event catalog.
//!
//! Event mutations are staged in memory, coalesced by a debounce timer,
//! written to a handoff file and handed to two external stages: a build
//! stage that recomputes the index and an ingest stage that loads it.
//!
//! # Components
//!
//! - [`ChangeAccumulator`]: pending upserts and deletes, last write wins
//! - [`HandoffWriter`]: atomic write of the pending batch; drains only on success
//! - [`PipelineRunner`]: build then ingest, with per-stage timeout and retries
//! - [`StatusRecorder`]: best-effort record of the latest outcome
//! - [`IndexCoordinator`]: ties the above together behind notify/trigger calls
//!
//! # Example
//!
//! ```ignore
//! use indexer_pipeline::IndexCoordinator;
//! use indexer_types::{EventRecord, Settings};
//!
//! let settings = Settings::load(None)?;
//! let coordinator = IndexCoordinator::new(&settings)?;
//!
//! coordinator.notify_upsert(EventRecord::new("42").with_field("title", "Expo"));
//! coordinator.notify_delete("7");
//!
//! // Or bypass the debounce timer and wait for the outcome
//! let outcome = coordinator.trigger_rebuild_now().await?;
//! ```

pub mod accumulator;
pub mod coordinator;
pub mod error;
pub mod handoff;
pub mod runner;
pub mod stage;
pub mod status;

pub use accumulator::ChangeAccumulator;
pub use coordinator::{IndexCoordinator, RunOutcome};
pub use error::{PipelineError, StageError};
pub use handoff::{FlushedBatch, HandoffWriter};
pub use runner::{PipelineRunner, RunOptions, RunReport, StageLayout};
pub use stage::{ProcessExecutor, StageCommand, StageExecutor};
pub use status::StatusRecorder;
