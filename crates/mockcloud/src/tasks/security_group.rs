//! Security group task and the ingress pruning it drives

use super::{SecurityGroupRule, Vpc, named, sync_tags};
use crate::cloud::{IpPermission, MockCloud, SecurityGroupRecord, Tags};
use anyhow::{Context, bail};
use converge::{
    Action, ChangeDescriptor, ConfigurationError, Deletion, Diff, Lifecycle, RemovalRule,
    Resource, Task, TaskContext, TaskError, TaskRef, TaskSet, parse_removal_rule, run_resource,
};
use std::sync::{Arc, OnceLock};

/// A firewall group inside a VPC
///
/// Identified by name within its VPC. Description and VPC cannot change
/// in place. `remove_extra_rules` names ingress permissions that must not
/// exist unless a [`SecurityGroupRule`] task declares them; the deletion
/// pass revokes the rest.
#[derive(Debug)]
pub struct SecurityGroup {
    name: String,
    lifecycle: Lifecycle,
    description: Option<String>,
    vpc: Arc<Vpc>,
    tags: Tags,
    remove_extra_rules: Vec<String>,
    id: OnceLock<String>,
}

impl SecurityGroup {
    pub fn new(name: impl Into<String>, vpc: &Arc<Vpc>) -> Self {
        let name = name.into();
        Self {
            tags: named(&name),
            name,
            lifecycle: Lifecycle::Sync,
            description: None,
            vpc: Arc::clone(vpc),
            remove_extra_rules: Vec::new(),
            id: OnceLock::new(),
        }
    }

    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Prune undeclared permissions matching `rule`, e.g. `port=22`
    pub fn remove_extra_rule(mut self, rule: impl Into<String>) -> Self {
        self.remove_extra_rules.push(rule.into());
        self
    }

    /// Provider id, known once the group was found or created
    pub fn id(&self) -> Option<&str> {
        self.id.get().map(String::as_str)
    }

    pub fn vpc(&self) -> &Arc<Vpc> {
        &self.vpc
    }

    fn publish(&self, id: &str) {
        if self.id.set(id.to_string()).is_err() {
            log::debug!("security group {}: id already set, keeping it", self.name);
        }
    }

    fn removal_rules(&self) -> Result<Vec<RemovalRule>, ConfigurationError> {
        self.remove_extra_rules
            .iter()
            .map(|rule| parse_removal_rule(rule))
            .collect()
    }

    /// Resolve the group's id, discovering the group and its VPC when no
    /// run has published them yet. `Ok(None)` means the group does not
    /// exist.
    fn resolve_id(&self, cloud: &MockCloud) -> anyhow::Result<Option<String>> {
        if let Some(id) = self.id() {
            return Ok(Some(id.to_string()));
        }
        if self.vpc.id().is_none() {
            let vpc = self
                .vpc
                .find(cloud)
                .with_context(|| format!("finding vpc {}", self.vpc.name()))?;
            match vpc {
                Some(vpc) => self.vpc.adopt(&vpc),
                None => return Ok(None),
            }
        }
        let Some(group) = self.find(cloud)? else {
            return Ok(None);
        };
        self.publish(&group.id);
        Ok(Some(group.id))
    }

    /// Refuse to create a group while dependents may hold a published id
    fn ensure_unpublished(&self) -> anyhow::Result<()> {
        if let Some(published) = self.id.get() {
            bail!(
                "security group {} already published id {published}; rebuild the task to recreate it",
                self.name
            );
        }
        Ok(())
    }

    fn create(&self, cloud: &MockCloud) -> anyhow::Result<()> {
        self.ensure_unpublished()?;
        let vpc_id = self
            .vpc
            .id()
            .with_context(|| format!("vpc {} has no id yet", self.vpc.name()))?;
        let description = self.description.as_deref().unwrap_or(&self.name);
        let created = cloud
            .create_security_group(&self.name, description, vpc_id, &self.tags)
            .with_context(|| format!("creating security group {}", self.name))?;
        log::info!("security group {}: created {}", self.name, created.id);
        self.publish(&created.id);
        Ok(())
    }
}

impl Resource<MockCloud> for SecurityGroup {
    type Actual = SecurityGroupRecord;

    fn find(&self, cloud: &MockCloud) -> anyhow::Result<Option<SecurityGroupRecord>> {
        // The VPC was not created yet (dry run), so neither was the group
        let Some(vpc_id) = self.vpc.id() else {
            return Ok(None);
        };
        let groups = cloud
            .describe_security_groups()
            .with_context(|| format!("listing security groups for {}", self.name))?;

        Ok(groups.into_iter().find(|group| match self.id() {
            Some(id) => group.id == id,
            None => group.vpc_id == vpc_id && group.group_name == self.name,
        }))
    }

    fn diff(&self, actual: Option<&SecurityGroupRecord>, diff: &mut Diff) {
        diff.replace(
            "description",
            self.description.as_ref(),
            actual.map(|a| &a.description),
        )
        .replace("vpc", self.vpc.id(), actual.map(|a| a.vpc_id.as_str()))
        .mutable("tags", Some(&self.tags), actual.map(|a| &a.tags));
    }

    fn adopt(&self, actual: &SecurityGroupRecord) {
        self.publish(&actual.id);
    }

    fn render(
        &self,
        cloud: &MockCloud,
        actual: Option<&SecurityGroupRecord>,
        change: &ChangeDescriptor,
    ) -> anyhow::Result<()> {
        match (actual, change.action) {
            (Some(actual), Action::Update) => sync_tags(cloud, &actual.id, &self.tags, &actual.tags),
            (Some(old), _) => {
                self.ensure_unpublished()?;
                log::info!("security group {}: replacing {}", self.name, old.id);
                cloud
                    .delete_security_group(&old.id)
                    .with_context(|| format!("deleting security group {}", old.id))?;
                self.create(cloud)
            }
            (None, _) => self.create(cloud),
        }
    }
}

impl Task<MockCloud> for SecurityGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> &'static str {
        "security_group"
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskRef<MockCloud>> {
        vec![TaskRef::from(Arc::clone(&self.vpc))]
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        self.removal_rules().map(|_| ())
    }

    fn run(&self, ctx: &TaskContext<'_, MockCloud>) -> Result<ChangeDescriptor, TaskError> {
        run_resource(self, ctx)
    }

    fn find_deletions(
        &self,
        cloud: &MockCloud,
        tasks: &TaskSet<MockCloud>,
    ) -> anyhow::Result<Vec<Box<dyn Deletion<MockCloud>>>> {
        let rules = self.removal_rules()?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }
        let Some(group_id) = self.resolve_id(cloud)? else {
            log::debug!("security group {}: does not exist, nothing to prune", self.name);
            return Ok(Vec::new());
        };

        let declared: Vec<&SecurityGroupRule> = tasks
            .of_type::<SecurityGroupRule>()
            .filter(|rule| std::ptr::eq(rule.security_group().as_ref(), self))
            .collect();

        let permissions = cloud
            .describe_ingress(&group_id)
            .with_context(|| format!("listing ingress of {}", self.name))?;

        let mut deletions: Vec<Box<dyn Deletion<MockCloud>>> = Vec::new();
        for permission in permissions {
            if !rules.iter().any(|rule| rule.matches(&permission)) {
                continue;
            }
            if declared.iter().any(|rule| rule.describes(&permission)) {
                continue;
            }
            log::debug!("security group {}: pruning {permission}", self.name);
            deletions.push(Box::new(RevokeIngress { permission }));
        }
        Ok(deletions)
    }
}

/// An undeclared ingress permission scheduled for revocation
#[derive(Debug)]
pub struct RevokeIngress {
    permission: IpPermission,
}

impl RevokeIngress {
    pub fn permission(&self) -> &IpPermission {
        &self.permission
    }
}

impl Deletion<MockCloud> for RevokeIngress {
    fn resource_type(&self) -> &'static str {
        "ingress"
    }

    fn item(&self) -> String {
        self.permission.to_string()
    }

    fn delete(&self, cloud: &MockCloud) -> anyhow::Result<()> {
        cloud
            .revoke_ingress(&self.permission.id)
            .with_context(|| format!("revoking {}", self.permission))?;
        Ok(())
    }
}
