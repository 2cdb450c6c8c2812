//! Task trait for declarative reconciliation
//!
//! A Task is one unit of desired state for one resource. Tasks reference
//! the tasks they depend on by holding shared `Arc`s to them, so a
//! dependency is identified by the object, never by a name lookup.

use crate::changes::ChangeDescriptor;
use crate::context::TaskContext;
use crate::error::{ConfigurationError, TaskError};
use crate::types::Lifecycle;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Core trait for reconciled resources
///
/// `C` is the provider handle the task discovers and changes state
/// through. Most resource kinds implement [`Resource`](crate::Resource) and
/// forward `run` to [`run_resource`](crate::run_resource).
pub trait Task<C>: Send + Sync + fmt::Debug + Any {
    /// Name of the task, unique within a run
    fn name(&self) -> &str;

    /// Resource type category, e.g. "vpc" or "security_group"
    fn resource_type(&self) -> &'static str;

    /// Policy for what the engine may do to this resource
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Sync
    }

    /// Tasks that must complete before this one
    fn dependencies(&self) -> Vec<TaskRef<C>> {
        Vec::new()
    }

    /// Check static configuration before anything runs
    fn validate(&self) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Discover, diff and dispatch this task's change
    fn run(&self, ctx: &TaskContext<'_, C>) -> Result<ChangeDescriptor, TaskError>;

    /// Objects this task wants pruned during a deletion pass
    ///
    /// `tasks` is the full collection of the run, so a task can tell
    /// declared objects from leftovers.
    fn find_deletions(
        &self,
        _cloud: &C,
        _tasks: &TaskSet<C>,
    ) -> anyhow::Result<Vec<Box<dyn Deletion<C>>>> {
        Ok(Vec::new())
    }
}

/// Something found to be pruned by a deletion pass
pub trait Deletion<C>: Send + Sync + fmt::Debug {
    /// Resource type of the object being removed
    fn resource_type(&self) -> &'static str;

    /// Human-readable description of the object being removed
    fn item(&self) -> String;

    /// Remove the object from the provider
    fn delete(&self, cloud: &C) -> anyhow::Result<()>;
}

/// A shared reference to another task
pub struct TaskRef<C>(Arc<dyn Task<C>>);

impl<C: 'static> TaskRef<C> {
    pub fn new(task: Arc<dyn Task<C>>) -> Self {
        Self(task)
    }

    /// The referenced task
    pub fn task(&self) -> &Arc<dyn Task<C>> {
        &self.0
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Address identifying the referenced object
    pub(crate) fn addr(&self) -> usize {
        task_addr(&self.0)
    }
}

impl<C: 'static, T: Task<C>> From<Arc<T>> for TaskRef<C> {
    fn from(task: Arc<T>) -> Self {
        Self(task)
    }
}

impl<C: 'static> Clone for TaskRef<C> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<C: 'static> fmt::Debug for TaskRef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskRef").field(&self.name()).finish()
    }
}

pub(crate) fn task_addr<C: 'static>(task: &Arc<dyn Task<C>>) -> usize {
    Arc::as_ptr(task).cast::<()>() as usize
}

/// The collection of tasks making up one desired-state graph
///
/// Tasks keep their insertion order, which is also the order ready tasks
/// are queued in.
pub struct TaskSet<C> {
    tasks: Vec<Arc<dyn Task<C>>>,
    index: HashMap<String, usize>,
}

impl<C: 'static> TaskSet<C> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a task, rejecting duplicate names
    pub fn insert<T: Task<C>>(&mut self, task: Arc<T>) -> Result<(), ConfigurationError> {
        self.insert_dyn(task)
    }

    /// Add an already type-erased task
    pub fn insert_dyn(&mut self, task: Arc<dyn Task<C>>) -> Result<(), ConfigurationError> {
        let name = task.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ConfigurationError::DuplicateTask(name));
        }
        self.index.insert(name, self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Task<C>>> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tasks in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Task<C>>> {
        self.tasks.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name())
    }

    /// Tasks of concrete type `T`
    pub fn of_type<T: Task<C>>(&self) -> impl Iterator<Item = &T> {
        self.tasks.iter().filter_map(|t| {
            let any: &dyn Any = t.as_ref();
            any.downcast_ref::<T>()
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<C: 'static> Default for TaskSet<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> fmt::Debug for TaskSet<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
