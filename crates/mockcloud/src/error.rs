//! Error types for mock cloud operations.
//!
//! Variants mirror the failure classes a real provider API reports, so
//! tasks exercise the same error paths they would against one.

use converge::AccessDenied;
use thiserror::Error;

/// Errors returned by [`MockCloud`](crate::MockCloud) operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// The caller may not perform the operation
    #[error("unauthorized operation")]
    AccessDenied(#[from] AccessDenied),

    /// The operation failed transiently
    #[error("{operation}: service unavailable")]
    Unavailable { operation: &'static str },

    /// The referenced object does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// An equivalent object already exists
    #[error("{kind} {id} already exists")]
    Duplicate { kind: &'static str, id: String },

    /// The object still has dependent objects
    #[error("{id} has a dependent object: {dependent}")]
    DependencyViolation { id: String, dependent: String },
}

impl CloudError {
    /// Provider-style error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccessDenied(_) => "UnauthorizedOperation",
            Self::Unavailable { .. } => "Unavailable",
            Self::NotFound { .. } => "NotFound",
            Self::Duplicate { .. } => "Duplicate",
            Self::DependencyViolation { .. } => "DependencyViolation",
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Result type for mock cloud operations.
pub type Result<T> = std::result::Result<T, CloudError>;
