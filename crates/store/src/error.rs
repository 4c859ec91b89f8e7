use thiserror::Error;

use depot_core::DomainError;

/// Store operation error.
///
/// These are **infrastructure errors** (storage, concurrency), as opposed to
/// domain errors (validation, invariants). The engine maps `Conflict` into
/// its retry discipline and everything else into a generic internal error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Conditional write failed: the stored version no longer matches.
    #[error("conditional write conflict: {0}")]
    Conflict(String),

    /// The addressed record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The write violates store-level integrity (duplicate id, decided
    /// transaction, malformed row).
    #[error("invalid write: {0}")]
    InvalidWrite(String),

    /// Backend failure (connection, lock poisoning, serialization).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for DomainError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => DomainError::conflict(msg),
            StoreError::NotFound(what) => DomainError::not_found(what),
            StoreError::InvalidWrite(msg) | StoreError::Backend(msg) => DomainError::internal(msg),
        }
    }
}
