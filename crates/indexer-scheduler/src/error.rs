//! Error types for the scheduler crate.

use thiserror::Error;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Constructed outside of a Tokio runtime
    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

impl From<tokio::runtime::TryCurrentError> for SchedulerError {
    fn from(err: tokio::runtime::TryCurrentError) -> Self {
        SchedulerError::NoRuntime(err.to_string())
    }
}
