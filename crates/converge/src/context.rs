//! Run context and observer traits
//!
//! Everything a run needs is threaded through an explicit [`RunContext`];
//! nothing survives between runs.

use crate::target::Target;
use crate::types::{RunOptions, TaskOutcome, TaskState};
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cancellation signal shared between a run and its caller
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop starting new tasks; running tasks finish
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Observer for task state transitions
///
/// Calls are made while the scheduler's lock is held, so the observed
/// sequence is exactly the order transitions happened in. Implementations
/// must be quick and must not block.
pub trait ProgressCallback: Send + Sync {
    /// Called on every state change of a task
    fn on_transition(&self, _task: &str, _state: TaskState) {}

    /// Called once a task reaches its final state
    fn on_complete(&self, _task: &str, _outcome: &TaskOutcome) {}
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {}

/// Context for one reconciliation run
pub struct RunContext<'a, C> {
    cloud: &'a C,
    target: &'a dyn Target<C>,
    options: RunOptions,
    cancel: CancelToken,
    progress: &'a dyn ProgressCallback,
}

impl<'a, C> RunContext<'a, C> {
    /// Create a context with default options
    pub fn new(cloud: &'a C, target: &'a dyn Target<C>) -> Self {
        Self {
            cloud,
            target,
            options: RunOptions::default(),
            cancel: CancelToken::new(),
            progress: &NoProgress,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a cancellation token held by the caller
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn cloud(&self) -> &'a C {
        self.cloud
    }

    pub fn target(&self) -> &'a dyn Target<C> {
        self.target
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn progress(&self) -> &'a dyn ProgressCallback {
        self.progress
    }
}

/// Context passed to a single task's `run`
pub struct TaskContext<'a, C> {
    task: &'a str,
    cloud: &'a C,
    target: &'a dyn Target<C>,
    options: &'a RunOptions,
    warnings: RefCell<Vec<String>>,
}

impl<'a, C> TaskContext<'a, C> {
    pub fn new(
        task: &'a str,
        cloud: &'a C,
        target: &'a dyn Target<C>,
        options: &'a RunOptions,
    ) -> Self {
        Self {
            task,
            cloud,
            target,
            options,
            warnings: RefCell::new(Vec::new()),
        }
    }

    /// Name of the task being run
    pub fn task(&self) -> &'a str {
        self.task
    }

    pub fn cloud(&self) -> &'a C {
        self.cloud
    }

    pub fn target(&self) -> &'a dyn Target<C> {
        self.target
    }

    pub fn options(&self) -> &'a RunOptions {
        self.options
    }

    /// Record a warning against this task
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}: {}", self.task, message);
        self.warnings.borrow_mut().push(message);
    }

    /// Warnings recorded so far
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.borrow().clone()
    }

    pub(crate) fn into_warnings(self) -> Vec<String> {
        self.warnings.into_inner()
    }
}
