//! Core types for task-graph reconciliation

use crate::changes::{Action, ChangeDescriptor};
use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Per-task policy governing what the engine may do to a resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    /// Fully managed: create, update and (in deletion passes) delete
    #[default]
    Sync,
    /// Must already exist; only presence and shape are checked
    ExistsAndValidates,
    /// Must already exist; divergence is reported as a warning
    ExistsAndWarnIfChanges,
    /// Managed like `Sync`, but skipped with a warning when the actor
    /// cannot inspect the resource
    WarnIfInsufficientAccess,
}

impl Lifecycle {
    /// Stable textual name, as accepted by [`FromStr`]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::ExistsAndValidates => "exists-and-validates",
            Self::ExistsAndWarnIfChanges => "exists-and-warn-if-changes",
            Self::WarnIfInsufficientAccess => "warn-if-insufficient-access",
        }
    }

    /// Whether the engine may create or modify the resource
    pub fn permits_mutation(&self) -> bool {
        matches!(self, Self::Sync | Self::WarnIfInsufficientAccess)
    }

    /// Whether the resource may be pruned during a deletion pass
    pub fn permits_deletion(&self) -> bool {
        matches!(self, Self::Sync)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "sync" => Ok(Self::Sync),
            "exists-and-validates" => Ok(Self::ExistsAndValidates),
            "exists-and-warn-if-changes" => Ok(Self::ExistsAndWarnIfChanges),
            "warn-if-insufficient-access" => Ok(Self::WarnIfInsufficientAccess),
            other => Err(format!("unknown lifecycle: {other}")),
        }
    }
}

/// Scheduler state of a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskState {
    /// Whether this is a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Why a run stopped starting new tasks early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interrupt {
    /// The caller's cancellation token fired
    Cancelled,
    /// The run exceeded its wall-clock budget
    TimedOut,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("run cancelled"),
            Self::TimedOut => f.write_str("run timed out"),
        }
    }
}

/// What made a blocking dependency unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    Failed,
    Skipped,
    /// Succeeded with warnings while tainted dependencies block
    Tainted,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed => f.write_str("failed"),
            Self::Skipped => f.write_str("skipped"),
            Self::Tainted => f.write_str("tainted"),
        }
    }
}

/// Why a task was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipCause {
    /// A dependency did not succeed.
    ///
    /// `chain` runs from the direct dependency to the task that caused the
    /// block, so `["sg", "vpc"]` means the direct dependency `sg` was itself
    /// blocked by `vpc`.
    Blocked {
        chain: Vec<String>,
        reason: BlockReason,
    },
    /// The actor lacks permission to inspect a `WarnIfInsufficientAccess` task
    InsufficientAccess { message: String },
    /// The run was interrupted before the task could start
    Interrupted(Interrupt),
}

impl SkipCause {
    /// The task at the root of a dependency block, if any
    pub fn blocked_by(&self) -> Option<&str> {
        match self {
            Self::Blocked { chain, .. } => chain.last().map(String::as_str),
            _ => None,
        }
    }
}

impl fmt::Display for SkipCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked { chain, reason } => {
                write!(f, "blocked by {reason} dependency: {}", chain.join(" <- "))
            }
            Self::InsufficientAccess { message } => write!(f, "insufficient access: {message}"),
            Self::Interrupted(interrupt) => write!(f, "not started: {interrupt}"),
        }
    }
}

/// Final outcome of one task in a run
#[derive(Debug)]
pub enum TaskOutcome {
    /// The task converged; `warnings` is non-empty for a tainted success
    Succeeded {
        change: ChangeDescriptor,
        warnings: Vec<String>,
    },
    Failed {
        error: TaskError,
    },
    Skipped {
        cause: SkipCause,
    },
}

impl TaskOutcome {
    /// Final scheduler state for this outcome
    pub fn state(&self) -> TaskState {
        match self {
            Self::Succeeded { .. } => TaskState::Succeeded,
            Self::Failed { .. } => TaskState::Failed,
            Self::Skipped { .. } => TaskState::Skipped,
        }
    }

    /// The change produced by a successful task
    pub fn change(&self) -> Option<&ChangeDescriptor> {
        match self {
            Self::Succeeded { change, .. } => Some(change),
            _ => None,
        }
    }

    /// Whether the task succeeded with warnings
    pub fn is_tainted(&self) -> bool {
        matches!(self, Self::Succeeded { warnings, .. } if !warnings.is_empty())
    }

    /// Whether this outcome counts against the run's success
    pub fn is_problem(&self) -> bool {
        match self {
            Self::Succeeded { .. } => false,
            Self::Failed { .. } => true,
            Self::Skipped { cause } => !matches!(cause, SkipCause::InsufficientAccess { .. }),
        }
    }
}

/// Counts of outcomes in a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
    pub warnings: usize,
}

impl RunSummary {
    /// Total number of changes made (or recorded, for dry runs)
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Total number of tasks accounted for
    pub fn total(&self) -> usize {
        self.total_changes() + self.unchanged + self.failed + self.skipped
    }

    /// Add an outcome to the summary
    pub fn add_outcome(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Succeeded { change, warnings } => {
                self.warnings += warnings.len();
                match change.action {
                    Action::NoChange => self.unchanged += 1,
                    Action::Create => self.created += 1,
                    Action::Update => self.updated += 1,
                    Action::Replace => self.replaced += 1,
                    Action::Delete => self.deleted += 1,
                }
            }
            TaskOutcome::Failed { .. } => self.failed += 1,
            TaskOutcome::Skipped { cause } => {
                if matches!(cause, SkipCause::InsufficientAccess { .. }) {
                    self.warnings += 1;
                }
                self.skipped += 1;
            }
        }
    }
}

/// Options for a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of tasks executing at once
    pub workers: usize,
    /// Let dependents proceed past a dependency skipped for insufficient
    /// access. Skips caused by failures or interruption always propagate.
    pub tolerate_skipped_dependencies: bool,
    /// Treat a dependency that succeeded with warnings as blocking
    pub block_on_tainted_dependencies: bool,
    /// Downgrade lifecycle violations to warnings
    pub warn_on_lifecycle_violation: bool,
    /// Wall-clock budget after which no new task starts
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            tolerate_skipped_dependencies: false,
            block_on_tainted_dependencies: false,
            warn_on_lifecycle_violation: false,
            timeout: None,
        }
    }
}
