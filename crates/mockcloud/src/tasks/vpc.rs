//! VPC task

use super::{named, sync_tags};
use crate::cloud::{MockCloud, Tags, VpcRecord};
use anyhow::{Context, bail};
use converge::{
    Action, ChangeDescriptor, ConfigurationError, Diff, Lifecycle, Resource, Task, TaskContext,
    TaskError, run_resource,
};
use std::sync::OnceLock;

/// A virtual network
///
/// Found by id once known, otherwise by its `Name` tag. The CIDR block
/// cannot change in place; tags can. A VPC pinned with [`Vpc::with_id`]
/// is never created or replaced, only found and retagged.
#[derive(Debug)]
pub struct Vpc {
    name: String,
    lifecycle: Lifecycle,
    cidr: Option<String>,
    tags: Tags,
    pinned_id: Option<String>,
    id: OnceLock<String>,
}

impl Vpc {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            tags: named(&name),
            name,
            lifecycle: Lifecycle::Sync,
            cidr: None,
            pinned_id: None,
            id: OnceLock::new(),
        }
    }

    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = Some(cidr.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Refer to an existing VPC by id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.pinned_id = Some(id.into());
        self
    }

    /// Provider id: the one found or created, else the pinned one
    pub fn id(&self) -> Option<&str> {
        self.id
            .get()
            .or(self.pinned_id.as_ref())
            .map(String::as_str)
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    fn publish(&self, id: &str) {
        if self.id.set(id.to_string()).is_err() {
            log::debug!("vpc {}: id already set, keeping it", self.name);
        }
    }

    /// Refuse to create a VPC whose id is already fixed, so dependents
    /// never hold an id that no longer exists
    fn ensure_replaceable(&self) -> anyhow::Result<()> {
        if let Some(pinned) = &self.pinned_id {
            bail!("vpc {} is pinned to {pinned} and cannot be recreated", self.name);
        }
        if let Some(published) = self.id.get() {
            bail!(
                "vpc {} already published id {published}; rebuild the task to recreate it",
                self.name
            );
        }
        Ok(())
    }
}

impl Resource<MockCloud> for Vpc {
    type Actual = VpcRecord;

    fn find(&self, cloud: &MockCloud) -> anyhow::Result<Option<VpcRecord>> {
        let vpcs = cloud
            .describe_vpcs()
            .with_context(|| format!("listing vpcs for {}", self.name))?;

        if let Some(id) = self.id() {
            let found = vpcs.into_iter().find(|vpc| vpc.id == id);
            if found.is_none() && self.pinned_id.is_some() {
                bail!("vpc {} is pinned to {id}, which does not exist", self.name);
            }
            return Ok(found);
        }

        let wanted = self.tags.get("Name");
        let mut matches: Vec<VpcRecord> = vpcs
            .into_iter()
            .filter(|vpc| vpc.tags.get("Name") == wanted)
            .collect();
        if matches.len() > 1 {
            bail!("found {} vpcs named {}", matches.len(), self.name);
        }
        Ok(matches.pop())
    }

    fn diff(&self, actual: Option<&VpcRecord>, diff: &mut Diff) {
        diff.replace("cidr", self.cidr.as_ref(), actual.map(|a| &a.cidr))
            .mutable("tags", Some(&self.tags), actual.map(|a| &a.tags));
    }

    fn adopt(&self, actual: &VpcRecord) {
        self.publish(&actual.id);
    }

    fn render(
        &self,
        cloud: &MockCloud,
        actual: Option<&VpcRecord>,
        change: &ChangeDescriptor,
    ) -> anyhow::Result<()> {
        match (actual, change.action) {
            (Some(actual), Action::Update) => sync_tags(cloud, &actual.id, &self.tags, &actual.tags),
            (actual, _) => {
                self.ensure_replaceable()?;
                if let Some(old) = actual {
                    log::info!("vpc {}: replacing {}", self.name, old.id);
                    cloud
                        .delete_vpc(&old.id)
                        .with_context(|| format!("deleting vpc {}", old.id))?;
                }
                let cidr = self
                    .cidr
                    .as_deref()
                    .context("cidr is required to create a vpc")?;
                let created = cloud
                    .create_vpc(cidr, &self.tags)
                    .with_context(|| format!("creating vpc {}", self.name))?;
                log::info!("vpc {}: created {}", self.name, created.id);
                self.publish(&created.id);
                Ok(())
            }
        }
    }
}

impl Task<MockCloud> for Vpc {
    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> &'static str {
        "vpc"
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(cidr) = &self.cidr
            && !is_cidr(cidr)
        {
            return Err(ConfigurationError::InvalidTask {
                task: self.name.clone(),
                message: format!("invalid cidr {cidr:?}"),
            });
        }
        Ok(())
    }

    fn run(&self, ctx: &TaskContext<'_, MockCloud>) -> Result<ChangeDescriptor, TaskError> {
        run_resource(self, ctx)
    }
}

/// IPv4 CIDR notation check: four octets and a prefix length
fn is_cidr(text: &str) -> bool {
    let Some((address, prefix)) = text.split_once('/') else {
        return false;
    };
    let octets: Vec<&str> = address.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|octet| octet.parse::<u8>().is_ok())
        && prefix.parse::<u8>().is_ok_and(|p| p <= 32)
}
