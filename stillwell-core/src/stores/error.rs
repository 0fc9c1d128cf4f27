use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by entity store operations.
///
/// Remote failures never show up here; they become queued operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record with local id {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
