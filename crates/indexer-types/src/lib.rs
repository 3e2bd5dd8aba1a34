//! # indexer-types
//!
//! Shared domain types for the event indexing coordinator.
//!
//! This crate defines the data structures exchanged between the
//! coordinator and the external build/ingest stages:
//! - [`EventRecord`]: the latest known representation of an event
//! - [`ChangeBatch`]: the handoff document written before each run
//! - [`PipelineStatus`]: the outcome record of the most recent run
//! - [`Settings`]: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use indexer_types::EventRecord;
//!
//! let event = EventRecord::new("42").with_field("title", "Expo");
//! assert_eq!(event.id, "42");
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod event;
pub mod status;

pub use batch::ChangeBatch;
pub use config::Settings;
pub use error::IndexerError;
pub use event::EventRecord;
pub use status::{PipelineStatus, Stage, StatusPhase};
