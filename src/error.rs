use thiserror::Error;
use validator::ValidationErrors;

use crate::store::error::StoreError;

/// Errors surfaced by the synchronization core's operations.
///
/// Race-losing writes (late buzz, duplicate answer, excluded team) are *not*
/// errors; they are normal outcomes carried by the receipt types of the
/// services that produce them.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Backend store could not be reached.
    #[error("store unavailable")]
    Unavailable(#[source] StoreError),
    /// A guarded write lost to a concurrent writer, or an operation targeted
    /// state that has already been superseded.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested entity was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Unavailable(err)
    }
}

impl From<ValidationErrors> for SyncError {
    fn from(err: ValidationErrors) -> Self {
        SyncError::InvalidInput(format!("validation failed: {err}"))
    }
}
