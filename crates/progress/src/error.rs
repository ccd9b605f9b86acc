//! Error taxonomy for progress operations.

use planwatch_storage::StorageError;

/// Error type for progress operations.
pub type Result<T> = std::result::Result<T, ProgressError>;

/// Errors raised by the analyzer, forecaster and aggregator.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    /// Input rejected (percent out of range, self-dependency, closed task)
    #[error("validation failed: {0}")]
    Validation(String),

    /// Task, project, milestone or dependency absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller lacks the privilege for this change
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Dependency structure cannot be repaired automatically
    #[error("structural problem: {0}")]
    Structural(String),

    /// A scheduling constraint cannot be satisfied
    #[error("timing problem: {0}")]
    Timing(String),

    /// Storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<planwatch_core::ModelError> for ProgressError {
    fn from(e: planwatch_core::ModelError) -> Self {
        ProgressError::Validation(e.to_string())
    }
}
