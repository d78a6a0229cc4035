use std::error::Error;
use thiserror::Error;
use uuid::Uuid;

use crate::store::Table;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error raised by row-store backends regardless of the underlying engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or the operation failed in transit.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Human-readable failure description.
        message: String,
        /// Backend-specific cause.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// An insert targeted an id that already exists.
    #[error("duplicate row `{id}` in {table:?}")]
    Duplicate {
        /// Table the insert targeted.
        table: Table,
        /// Conflicting primary key.
        id: Uuid,
    },
}

impl StoreError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StoreError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
