//! Error types for reconciliation runs.
//!
//! Configuration errors are fatal and detected before any task executes.
//! Task errors are per-task: they fail that task, block its dependents and
//! leave independent branches running.

use crate::changes::ChangeDescriptor;
use crate::types::Lifecycle;
use thiserror::Error;

/// Errors in the shape of the task collection or its static configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// The dependency graph contains a cycle
    #[error("dependency cycle detected: {}", .path.join(" -> "))]
    Cycle {
        /// Task names along the cycle, first and last being the same task
        path: Vec<String>,
    },

    /// A task declares itself as a dependency
    #[error("task {task:?} depends on itself")]
    SelfReference { task: String },

    /// Two tasks share a name
    #[error("duplicate task name {0:?}")]
    DuplicateTask(String),

    /// An edge refers to a task that is not part of the graph
    #[error("edge refers to unknown task {0:?}")]
    UnknownTask(String),

    /// A removal rule could not be parsed
    #[error("cannot parse removal rule {rule:?}: {reason}")]
    InvalidRemovalRule { rule: String, reason: String },

    /// A task rejected its own configuration
    #[error("invalid task {task:?}: {message}")]
    InvalidTask { task: String, message: String },
}

/// Categories of task errors.
///
/// Used to decide whether re-running the whole graph is worthwhile and how
/// to present the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Provider state could not be discovered
    Discovery,
    /// The change could not be realized
    Apply,
    /// The resource violates its lifecycle policy
    Lifecycle,
    /// The actor lacks permission to inspect the resource
    Access,
    /// The task implementation panicked
    Panic,
}

impl ErrorCategory {
    /// Whether re-running the graph may succeed without configuration changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Discovery)
    }

    /// Short description of this category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Discovery => "Could not discover current state",
            Self::Apply => "Could not apply change",
            Self::Lifecycle => "Lifecycle policy violated",
            Self::Access => "Insufficient access",
            Self::Panic => "Task panicked",
        }
    }
}

/// Errors raised while running a single task
#[derive(Debug, Error)]
pub enum TaskError {
    /// `find` failed
    #[error("discovery failed: {0:#}")]
    Discovery(anyhow::Error),

    /// The target failed to realize the change
    #[error("apply failed: {0:#}")]
    Apply(anyhow::Error),

    /// The resource does not satisfy its lifecycle
    #[error("lifecycle {lifecycle} violated: {message}")]
    LifecycleViolation {
        lifecycle: Lifecycle,
        message: String,
    },

    /// Discovery was denied for a `WarnIfInsufficientAccess` task
    #[error("insufficient access: {0}")]
    InsufficientAccess(String),

    /// The task implementation panicked
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Discovery(_) => ErrorCategory::Discovery,
            Self::Apply(_) => ErrorCategory::Apply,
            Self::LifecycleViolation { .. } => ErrorCategory::Lifecycle,
            Self::InsufficientAccess(_) => ErrorCategory::Access,
            Self::Panicked(_) => ErrorCategory::Panic,
        }
    }

    /// Whether re-running the graph may succeed.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Marker error a provider returns when the actor may not perform an
/// operation.
///
/// The engine looks for it anywhere in an error's source chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("access denied: {operation}")]
pub struct AccessDenied {
    pub operation: String,
}

impl AccessDenied {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

/// Whether `err` was caused by an [`AccessDenied`] provider error.
pub fn is_access_denied(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<AccessDenied>())
}

/// Run-level errors
#[derive(Debug, Error)]
pub enum Error {
    /// The task collection is misconfigured; nothing was executed
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// Some tasks failed or were skipped
    #[error("run incomplete: {failed} task(s) failed, {skipped} task(s) skipped")]
    Incomplete { failed: usize, skipped: usize },

    /// A run expected to converge produced changes
    #[error("expected no changes, found {}: {}", .0.len(), describe(.0))]
    UnexpectedChanges(Vec<ChangeDescriptor>),
}

fn describe(changes: &[ChangeDescriptor]) -> String {
    changes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for run-level operations.
pub type Result<T> = std::result::Result<T, Error>;
