//! # Converge
//!
//! A task-graph reconciliation engine.
//!
//! Desired state is a collection of tasks, one per resource. The engine
//! derives a dependency graph from the references tasks hold to each other,
//! walks it with bounded concurrency, lets each task discover and diff its
//! resource, and dispatches the resulting change to a target. Running the
//! same collection twice against the same provider converges to a no-op.
//!
//! ## Core Concepts
//!
//! - **Task**: Unit of desired state for one resource, with a [`Lifecycle`]
//! - **TaskGraph**: Dependency DAG built from shared `Arc` references
//! - **Resource**: The find / diff / render protocol most tasks implement
//! - **Target**: Sink that realizes ([`ApiTarget`]) or records ([`DryRunTarget`]) changes
//! - **RemovalRule**: Textual predicate selecting firewall permissions to prune
//!
//! ## Example
//!
//! ```ignore
//! use converge::{ApiTarget, RunOptions, TaskSet, check_no_changes, run_tasks};
//! use std::sync::Arc;
//!
//! let vpc = Arc::new(Vpc::new("main").cidr("10.0.0.0/16"));
//! let sg = Arc::new(SecurityGroup::new("web", &vpc).description("web tier"));
//!
//! let mut tasks = TaskSet::new();
//! tasks.insert(vpc)?;
//! tasks.insert(sg)?;
//!
//! let report = run_tasks(&cloud, &ApiTarget, &tasks, RunOptions::default())?;
//! report.ensure_success()?;
//!
//! // A second pass must find nothing to do
//! check_no_changes(&cloud, &tasks, RunOptions::default())?;
//! ```
//!
//! ## Observers
//!
//! - [`ProgressCallback`]: Receives every task state transition
//! - [`CancelToken`]: Stops a run from starting further tasks

pub mod changes;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod removal;
pub mod resource;
mod scheduler;
pub mod target;
pub mod task;
pub mod types;

// Re-export main types at crate root
pub use changes::{Action, ChangeDescriptor, Diff, FieldDelta, FieldPolicy};
pub use context::{CancelToken, NoProgress, ProgressCallback, RunContext, TaskContext};
pub use error::{
    AccessDenied, ConfigurationError, Error, ErrorCategory, Result, TaskError, is_access_denied,
};
pub use executor::{RunReport, check_no_changes, run_tasks};
pub use graph::{Edge, TaskGraph, extract_edges};
pub use removal::{PortRange, PortRemovalRule, RemovalRule, parse_removal_rule};
pub use resource::{Resource, run_resource};
pub use target::{ApiTarget, DryRunTarget, Render, Target};
pub use task::{Deletion, Task, TaskRef, TaskSet};
pub use types::{
    BlockReason, Interrupt, Lifecycle, RunOptions, RunSummary, SkipCause, TaskOutcome, TaskState,
};
