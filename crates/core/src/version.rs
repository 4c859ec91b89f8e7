//! Optimistic-concurrency version expectation.

use crate::error::{DomainError, DomainResult};

/// Optimistic concurrency expectation for a versioned aggregate/position.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (useful for idempotent commands, migrations, etc.).
    Any,
    /// Require the aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Whether `actual` satisfies this expectation.
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    /// Returns a [`DomainError::Conflict`] when `actual` does not satisfy this
    /// expectation, `Ok(())` otherwise.
    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "expected version {self:?}, found {actual}"
            )))
        }
    }
}
