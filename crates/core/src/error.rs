//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, non-positive quantity).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A requested resource was not found (unknown position/transaction/reservation).
    #[error("{0} not found")]
    NotFound(String),

    /// Optimistic concurrency conflict (stale version). Retryable.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// The resulting on-hand quantity would go negative without backorder permission.
    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    /// The resulting reserved quantity would violate `0 <= reserved <= on_hand`.
    #[error("invalid reservation: {0}")]
    InvalidReservation(String),

    /// Not enough available stock to place a hold.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// An operation was attempted against a state that does not permit it
    /// (e.g. approving an already-decided transaction).
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Persistence or other infrastructure failure, surfaced generically.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn insufficient_stock(msg: impl Into<String>) -> Self {
        Self::InsufficientStock(msg.into())
    }

    pub fn invalid_reservation(msg: impl Into<String>) -> Self {
        Self::InvalidReservation(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidStateTransition(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a caller may retry the operation after a fresh read.
    ///
    /// Only concurrency conflicts are retryable; business-rule rejections
    /// must be surfaced to the caller as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
