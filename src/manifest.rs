//! Network manifest
//!
//! A TOML file declaring VPCs, security groups and ingress rules. Groups
//! name their VPC and rules name their group; references resolve to the
//! shared task objects, which is what the engine derives ordering from.
//!
//! ```toml
//! [[vpc]]
//! name = "main"
//! cidr = "10.0.0.0/16"
//!
//! [[security_group]]
//! name = "web"
//! vpc = "main"
//! description = "web tier"
//! remove_extra_rules = ["port=22"]
//!
//! [[rule]]
//! name = "web-https"
//! security_group = "web"
//! port = 443
//! cidr = "0.0.0.0/0"
//! ```

use anyhow::{Context, Result};
use converge::{ConfigurationError, Lifecycle, TaskSet};
use mockcloud::{MockCloud, SecurityGroup, SecurityGroupRule, Tags, Vpc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("security group {group} refers to unknown vpc {vpc}")]
    UnknownVpc { group: String, vpc: String },

    #[error("rule {rule} refers to unknown security group {group}")]
    UnknownSecurityGroup { rule: String, group: String },

    #[error("rule {rule}: use either `port` or `from_port`/`to_port`")]
    AmbiguousPorts { rule: String },

    #[error("rule {rule}: `from_port` and `to_port` must be given together")]
    HalfRange { rule: String },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default, rename = "vpc")]
    pub vpcs: Vec<VpcSpec>,

    #[serde(default, rename = "security_group")]
    pub security_groups: Vec<SecurityGroupSpec>,

    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VpcSpec {
    pub name: String,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub cidr: Option<String>,
    /// Refer to an existing VPC instead of finding it by name
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub vpc: String,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub remove_extra_rules: Vec<String>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub name: String,
    pub security_group: String,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(default)]
    pub from_port: Option<i64>,
    #[serde(default)]
    pub to_port: Option<i64>,
    #[serde(default)]
    pub cidr: Option<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Build fresh task objects for one run
    pub fn tasks(&self) -> Result<TaskSet<MockCloud>, ManifestError> {
        let mut tasks = TaskSet::new();

        let mut vpcs = HashMap::new();
        for spec in &self.vpcs {
            let vpc = Arc::new(spec.build());
            vpcs.insert(spec.name.as_str(), Arc::clone(&vpc));
            tasks.insert(vpc)?;
        }

        let mut groups = HashMap::new();
        for spec in &self.security_groups {
            let vpc = vpcs.get(spec.vpc.as_str()).ok_or_else(|| ManifestError::UnknownVpc {
                group: spec.name.clone(),
                vpc: spec.vpc.clone(),
            })?;
            let group = Arc::new(spec.build(vpc));
            groups.insert(spec.name.as_str(), Arc::clone(&group));
            tasks.insert(group)?;
        }

        for spec in &self.rules {
            let group = groups.get(spec.security_group.as_str()).ok_or_else(|| {
                ManifestError::UnknownSecurityGroup {
                    rule: spec.name.clone(),
                    group: spec.security_group.clone(),
                }
            })?;
            tasks.insert(Arc::new(spec.build(group)?))?;
        }

        log::debug!("manifest declares {} task(s)", tasks.len());
        Ok(tasks)
    }
}

impl VpcSpec {
    fn build(&self) -> Vpc {
        let mut vpc = Vpc::new(&self.name).lifecycle(self.lifecycle);
        if let Some(cidr) = &self.cidr {
            vpc = vpc.cidr(cidr);
        }
        if let Some(id) = &self.id {
            vpc = vpc.with_id(id);
        }
        for (key, value) in &self.tags {
            vpc = vpc.tag(key, value);
        }
        vpc
    }
}

impl SecurityGroupSpec {
    fn build(&self, vpc: &Arc<Vpc>) -> SecurityGroup {
        let mut group = SecurityGroup::new(&self.name, vpc).lifecycle(self.lifecycle);
        if let Some(description) = &self.description {
            group = group.description(description);
        }
        for rule in &self.remove_extra_rules {
            group = group.remove_extra_rule(rule);
        }
        for (key, value) in &self.tags {
            group = group.tag(key, value);
        }
        group
    }
}

impl RuleSpec {
    fn build(&self, group: &Arc<SecurityGroup>) -> Result<SecurityGroupRule, ManifestError> {
        let mut rule = SecurityGroupRule::new(&self.name, group).lifecycle(self.lifecycle);
        if let Some(protocol) = &self.protocol {
            rule = rule.protocol(protocol);
        }
        rule = match (self.port, self.from_port, self.to_port) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(ManifestError::AmbiguousPorts {
                    rule: self.name.clone(),
                });
            }
            (Some(port), None, None) => rule.port(port),
            (None, Some(from), Some(to)) => rule.ports(from, to),
            (None, None, None) => rule,
            (None, _, _) => {
                return Err(ManifestError::HalfRange {
                    rule: self.name.clone(),
                });
            }
        };
        if let Some(cidr) = &self.cidr {
            rule = rule.cidr(cidr);
        }
        Ok(rule)
    }
}
