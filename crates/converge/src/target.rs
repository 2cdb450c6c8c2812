//! Execution targets - the sinks that realize or record changes

use crate::changes::{Action, ChangeDescriptor, FieldDelta};
use crate::task::Deletion;
use std::sync::{Mutex, MutexGuard};

/// The provider call that realizes one task's change
///
/// Handed to a target by [`run_resource`](crate::run_resource); a real
/// target invokes it, a recording target does not.
pub trait Render<C> {
    fn render(&self, cloud: &C, change: &ChangeDescriptor) -> anyhow::Result<()>;
}

/// Sink for change descriptors
pub trait Target<C>: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Called at the start of every run
    fn begin(&self) {}

    /// Realize or record a change. Never called for `NoChange`.
    fn render(
        &self,
        cloud: &C,
        change: &ChangeDescriptor,
        realize: &dyn Render<C>,
    ) -> anyhow::Result<()>;

    /// Realize or record a deletion found by a deletion pass
    fn delete(&self, cloud: &C, task: &str, deletion: &dyn Deletion<C>) -> anyhow::Result<()>;
}

/// Target that performs provider calls
#[derive(Debug, Default, Clone, Copy)]
pub struct ApiTarget;

impl<C> Target<C> for ApiTarget {
    fn name(&self) -> &'static str {
        "api"
    }

    fn render(
        &self,
        cloud: &C,
        change: &ChangeDescriptor,
        realize: &dyn Render<C>,
    ) -> anyhow::Result<()> {
        log::debug!("applying {change}");
        realize.render(cloud, change)
    }

    fn delete(&self, cloud: &C, task: &str, deletion: &dyn Deletion<C>) -> anyhow::Result<()> {
        log::debug!("{task}: deleting {} {}", deletion.resource_type(), deletion.item());
        deletion.delete(cloud)
    }
}

/// Target that records changes without making them
///
/// Used for previews and to assert that a run converged.
#[derive(Debug, Default)]
pub struct DryRunTarget {
    changes: Mutex<Vec<ChangeDescriptor>>,
}

impl DryRunTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes recorded since the last run started
    pub fn changes(&self) -> Vec<ChangeDescriptor> {
        self.lock().clone()
    }

    pub fn has_changes(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    fn record(&self, change: ChangeDescriptor) {
        log::debug!("would apply {change}");
        self.lock().push(change);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ChangeDescriptor>> {
        match self.changes.lock() {
            Ok(locked) => locked,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<C> Target<C> for DryRunTarget {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn begin(&self) {
        self.reset();
    }

    fn render(
        &self,
        _cloud: &C,
        change: &ChangeDescriptor,
        _realize: &dyn Render<C>,
    ) -> anyhow::Result<()> {
        self.record(change.clone());
        Ok(())
    }

    fn delete(&self, _cloud: &C, task: &str, deletion: &dyn Deletion<C>) -> anyhow::Result<()> {
        self.record(ChangeDescriptor::new(
            task,
            deletion.resource_type(),
            Action::Delete,
            vec![FieldDelta::removed(deletion.resource_type(), deletion.item())],
        ));
        Ok(())
    }
}
