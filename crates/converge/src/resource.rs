//! The find / diff / render protocol shared by resource tasks
//!
//! [`run_resource`] is the body of `Task::run` for anything implementing
//! [`Resource`]: discover the actual object, compare it field by field
//! against the desired state, apply the lifecycle policy and hand the
//! resulting change to the target.

use crate::changes::{Action, ChangeDescriptor, Diff};
use crate::context::TaskContext;
use crate::error::{TaskError, is_access_denied};
use crate::target::Render;
use crate::task::Task;
use crate::types::Lifecycle;
use std::fmt::Debug;
use std::marker::PhantomData;

/// A task whose state lives in the provider
pub trait Resource<C>: Send + Sync + Debug {
    /// The object as discovered in the provider
    type Actual: Debug + Send + Sync;

    /// Discover the actual object, `Ok(None)` when it does not exist
    fn find(&self, cloud: &C) -> anyhow::Result<Option<Self::Actual>>;

    /// Compare desired fields against `actual`.
    ///
    /// `actual` is `None` when the object does not exist; every set field
    /// then shows up as a delta.
    fn diff(&self, actual: Option<&Self::Actual>, diff: &mut Diff);

    /// Take over provider-assigned values (ids) from a discovered object
    fn adopt(&self, _actual: &Self::Actual) {}

    /// Make the provider match the desired state.
    ///
    /// `actual` is `None` for a create. Implementations publish any
    /// provider-assigned values before returning.
    fn render(
        &self,
        cloud: &C,
        actual: Option<&Self::Actual>,
        change: &ChangeDescriptor,
    ) -> anyhow::Result<()>;
}

/// Binds a resource to the object it was diffed against, so a target can
/// realize the change without knowing the concrete resource type
struct PendingChange<'r, R: Resource<C>, C> {
    resource: &'r R,
    actual: Option<&'r R::Actual>,
    cloud: PhantomData<fn(&C)>,
}

impl<R: Resource<C>, C> Render<C> for PendingChange<'_, R, C> {
    fn render(&self, cloud: &C, change: &ChangeDescriptor) -> anyhow::Result<()> {
        self.resource.render(cloud, self.actual, change)
    }
}

/// Run one resource task: find, diff, enforce lifecycle, dispatch.
pub fn run_resource<C, R>(
    resource: &R,
    ctx: &TaskContext<'_, C>,
) -> Result<ChangeDescriptor, TaskError>
where
    R: Resource<C> + Task<C>,
{
    let lifecycle = resource.lifecycle();
    let cloud = ctx.cloud();

    let actual = match resource.find(cloud) {
        Ok(actual) => actual,
        Err(err) if lifecycle == Lifecycle::WarnIfInsufficientAccess && is_access_denied(&err) => {
            return Err(TaskError::InsufficientAccess(format!("{err:#}")));
        }
        Err(err) => return Err(TaskError::Discovery(err)),
    };

    let mut diff = Diff::new();
    resource.diff(actual.as_ref(), &mut diff);
    let action = match &actual {
        None => Action::Create,
        Some(_) => diff.classify(),
    };
    log::trace!("{}: {} field(s) differ, {action}", ctx.task(), diff.deltas().len());

    match lifecycle {
        Lifecycle::ExistsAndValidates | Lifecycle::ExistsAndWarnIfChanges => {
            let Some(found) = actual.as_ref() else {
                let message = format!("{} does not exist", resource.resource_type());
                return violation(ctx, lifecycle, message, resource);
            };
            resource.adopt(found);
            if action != Action::NoChange {
                let fields: Vec<&str> = diff.deltas().iter().map(|d| d.field.as_str()).collect();
                let message = format!("fields differ: {}", fields.join(", "));
                if lifecycle == Lifecycle::ExistsAndValidates {
                    return violation(ctx, lifecycle, message, resource);
                }
                ctx.warn(message);
            }
            return Ok(ChangeDescriptor::no_change(ctx.task(), resource.resource_type()));
        }
        Lifecycle::Sync | Lifecycle::WarnIfInsufficientAccess => {}
    }

    if let Some(found) = actual.as_ref()
        && action != Action::Replace
    {
        resource.adopt(found);
    }

    let change = ChangeDescriptor::new(
        ctx.task(),
        resource.resource_type(),
        action,
        diff.into_deltas(),
    );
    if change.is_no_change() {
        return Ok(change);
    }

    let pending = PendingChange {
        resource,
        actual: actual.as_ref(),
        cloud: PhantomData,
    };
    ctx.target()
        .render(cloud, &change, &pending)
        .map_err(TaskError::Apply)?;
    Ok(change)
}

fn violation<C, R: Task<C>>(
    ctx: &TaskContext<'_, C>,
    lifecycle: Lifecycle,
    message: String,
    resource: &R,
) -> Result<ChangeDescriptor, TaskError> {
    if ctx.options().warn_on_lifecycle_violation {
        ctx.warn(format!("lifecycle {lifecycle} violated: {message}"));
        return Ok(ChangeDescriptor::no_change(ctx.task(), resource.resource_type()));
    }
    Err(TaskError::LifecycleViolation { lifecycle, message })
}
