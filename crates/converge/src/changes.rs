//! Change-set computation between desired and actual state
//!
//! Desired state is a partial specification: a field left unset never
//! produces a delta, whatever the provider reports for it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a field may change on an existing resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldPolicy {
    /// The field can be changed in place
    Mutable,
    /// Changing the field destroys and recreates the resource
    Replace,
}

/// Classification of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    NoChange,
    Create,
    Update,
    Replace,
    /// Produced only by deletion passes
    Delete,
}

impl Action {
    /// Single-character marker used in change listings
    pub fn symbol(&self) -> char {
        match self {
            Self::NoChange => '=',
            Self::Create => '+',
            Self::Update => '~',
            Self::Replace => '!',
            Self::Delete => '-',
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoChange => "no change",
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A single field-level difference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDelta {
    pub field: String,
    /// Rendered actual value, `None` when absent
    pub actual: Option<String>,
    /// Rendered desired value, `None` when the item is being removed
    pub desired: Option<String>,
    pub policy: FieldPolicy,
}

impl FieldDelta {
    /// A delta describing an item removed by a deletion pass
    pub fn removed(field: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            actual: Some(item.into()),
            desired: None,
            policy: FieldPolicy::Replace,
        }
    }
}

impl fmt::Display for FieldDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.field,
            self.actual.as_deref().unwrap_or("<unset>"),
            self.desired.as_deref().unwrap_or("<removed>")
        )
    }
}

/// The computed diff outcome for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    /// Name of the task that produced this change
    pub task: String,
    /// Resource type of the task
    pub resource_type: String,
    pub action: Action,
    /// Field-level deltas, in the order the task compared them
    pub deltas: Vec<FieldDelta>,
}

impl ChangeDescriptor {
    pub fn new(
        task: impl Into<String>,
        resource_type: impl Into<String>,
        action: Action,
        deltas: Vec<FieldDelta>,
    ) -> Self {
        Self {
            task: task.into(),
            resource_type: resource_type.into(),
            action,
            deltas,
        }
    }

    /// A descriptor recording that nothing needs to change
    pub fn no_change(task: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self::new(task, resource_type, Action::NoChange, Vec::new())
    }

    pub fn is_no_change(&self) -> bool {
        self.action == Action::NoChange
    }

    /// Whether `field` is among the deltas
    pub fn has_field(&self, field: &str) -> bool {
        self.deltas.iter().any(|d| d.field == field)
    }
}

impl fmt::Display for ChangeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} ({})",
            self.action.symbol(),
            self.resource_type,
            self.task,
            self.action
        )
    }
}

/// Builder comparing desired fields against a discovered object
///
/// ```
/// use converge::{Action, Diff};
///
/// let desired_cidr = Some("10.0.0.0/16".to_string());
/// let actual_cidr = Some("10.1.0.0/16".to_string());
///
/// let mut diff = Diff::new();
/// diff.replace("cidr", desired_cidr.as_ref(), actual_cidr.as_ref());
/// diff.mutable("name", None::<&String>, actual_cidr.as_ref());
///
/// assert_eq!(diff.deltas().len(), 1);
/// assert_eq!(diff.classify(), Action::Replace);
/// ```
#[derive(Debug, Default)]
pub struct Diff {
    deltas: Vec<FieldDelta>,
}

impl Diff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare one field.
    ///
    /// An unset desired value (`None`) never differs.
    pub fn field<T>(
        &mut self,
        name: &str,
        desired: Option<&T>,
        actual: Option<&T>,
        policy: FieldPolicy,
    ) -> &mut Self
    where
        T: PartialEq + fmt::Debug + ?Sized,
    {
        let Some(desired) = desired else {
            return self;
        };
        if actual == Some(desired) {
            return self;
        }
        self.deltas.push(FieldDelta {
            field: name.to_string(),
            actual: actual.map(|a| format!("{a:?}")),
            desired: Some(format!("{desired:?}")),
            policy,
        });
        self
    }

    /// Compare a field that can be changed in place
    pub fn mutable<T>(&mut self, name: &str, desired: Option<&T>, actual: Option<&T>) -> &mut Self
    where
        T: PartialEq + fmt::Debug + ?Sized,
    {
        self.field(name, desired, actual, FieldPolicy::Mutable)
    }

    /// Compare a field whose change forces recreation
    pub fn replace<T>(&mut self, name: &str, desired: Option<&T>, actual: Option<&T>) -> &mut Self
    where
        T: PartialEq + fmt::Debug + ?Sized,
    {
        self.field(name, desired, actual, FieldPolicy::Replace)
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn deltas(&self) -> &[FieldDelta] {
        &self.deltas
    }

    /// Classify the deltas against an existing resource
    pub fn classify(&self) -> Action {
        if self.deltas.is_empty() {
            Action::NoChange
        } else if self
            .deltas
            .iter()
            .any(|d| d.policy == FieldPolicy::Replace)
        {
            Action::Replace
        } else {
            Action::Update
        }
    }

    pub fn into_deltas(self) -> Vec<FieldDelta> {
        self.deltas
    }
}
