//! Ingress permission task

use super::SecurityGroup;
use crate::cloud::{IngressRequest, IpPermission, MockCloud};
use anyhow::{Context, bail};
use converge::{
    ChangeDescriptor, ConfigurationError, Diff, Lifecycle, Resource, Task, TaskContext, TaskError,
    TaskRef, run_resource,
};
use std::sync::{Arc, OnceLock};

/// One ingress permission of a security group
///
/// The protocol, ports and source CIDR identify the permission, so a
/// differing permission is simply a different one: found rules never
/// change, missing ones are created.
#[derive(Debug)]
pub struct SecurityGroupRule {
    name: String,
    lifecycle: Lifecycle,
    security_group: Arc<SecurityGroup>,
    protocol: String,
    from_port: Option<i64>,
    to_port: Option<i64>,
    cidr: Option<String>,
    id: OnceLock<String>,
}

impl SecurityGroupRule {
    pub fn new(name: impl Into<String>, security_group: &Arc<SecurityGroup>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Sync,
            security_group: Arc::clone(security_group),
            protocol: "tcp".to_string(),
            from_port: None,
            to_port: None,
            cidr: None,
            id: OnceLock::new(),
        }
    }

    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// A single port
    pub fn port(self, port: i64) -> Self {
        self.ports(port, port)
    }

    pub fn ports(mut self, from_port: i64, to_port: i64) -> Self {
        self.from_port = Some(from_port);
        self.to_port = Some(to_port);
        self
    }

    pub fn cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = Some(cidr.into());
        self
    }

    pub fn security_group(&self) -> &Arc<SecurityGroup> {
        &self.security_group
    }

    /// Provider id, known once the permission was found or created
    pub fn id(&self) -> Option<&str> {
        self.id.get().map(String::as_str)
    }

    /// Whether `permission` is the one this task declares
    pub fn describes(&self, permission: &IpPermission) -> bool {
        permission.protocol == self.protocol
            && permission.from_port == self.from_port
            && permission.to_port == self.to_port
            && permission.cidr == self.cidr
    }

    fn publish(&self, id: &str) {
        if self.id.set(id.to_string()).is_err() {
            log::debug!("rule {}: id already set, keeping it", self.name);
        }
    }
}

impl Resource<MockCloud> for SecurityGroupRule {
    type Actual = IpPermission;

    fn find(&self, cloud: &MockCloud) -> anyhow::Result<Option<IpPermission>> {
        let Some(group_id) = self.security_group.id() else {
            return Ok(None);
        };
        let permissions = cloud
            .describe_ingress(group_id)
            .with_context(|| format!("listing ingress of {group_id}"))?;
        Ok(permissions.into_iter().find(|p| self.describes(p)))
    }

    fn diff(&self, actual: Option<&IpPermission>, diff: &mut Diff) {
        diff.replace("protocol", Some(&self.protocol), actual.map(|a| &a.protocol))
            .replace(
                "from_port",
                self.from_port.as_ref(),
                actual.and_then(|a| a.from_port.as_ref()),
            )
            .replace(
                "to_port",
                self.to_port.as_ref(),
                actual.and_then(|a| a.to_port.as_ref()),
            )
            .replace("cidr", self.cidr.as_ref(), actual.and_then(|a| a.cidr.as_ref()));
    }

    fn adopt(&self, actual: &IpPermission) {
        self.publish(&actual.id);
    }

    fn render(
        &self,
        cloud: &MockCloud,
        actual: Option<&IpPermission>,
        _change: &ChangeDescriptor,
    ) -> anyhow::Result<()> {
        if let Some(existing) = actual {
            bail!("ingress permission {} cannot be modified", existing.id);
        }
        let group_id = self.security_group.id().with_context(|| {
            format!(
                "security group {} has no id yet",
                self.security_group.name()
            )
        })?;

        let request = IngressRequest {
            protocol: self.protocol.clone(),
            from_port: self.from_port,
            to_port: self.to_port,
            cidr: self.cidr.clone(),
        };
        let created = cloud
            .authorize_ingress(group_id, &request)
            .with_context(|| format!("authorizing ingress for rule {}", self.name))?;
        log::info!("rule {}: authorized {created}", self.name);
        self.publish(&created.id);
        Ok(())
    }
}

impl Task<MockCloud> for SecurityGroupRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> &'static str {
        "security_group_rule"
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskRef<MockCloud>> {
        vec![TaskRef::from(Arc::clone(&self.security_group))]
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if let (Some(from), Some(to)) = (self.from_port, self.to_port)
            && from > to
        {
            return Err(ConfigurationError::InvalidTask {
                task: self.name.clone(),
                message: format!("from port {from} is above to port {to}"),
            });
        }
        if self.protocol.is_empty() {
            return Err(ConfigurationError::InvalidTask {
                task: self.name.clone(),
                message: "protocol must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn run(&self, ctx: &TaskContext<'_, MockCloud>) -> Result<ChangeDescriptor, TaskError> {
        run_resource(self, ctx)
    }
}
