//! In-memory cloud provider
//!
//! Holds VPCs, security groups and ingress permissions behind one mutex.
//! Every call is counted per operation and may be made to fail through an
//! injected [`Fault`].

use crate::error::{CloudError, Result};
use converge::{AccessDenied, PortRange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Tag map attached to taggable objects
pub type Tags = BTreeMap<String, String>;

/// A provider operation, named like the API call it stands in for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    DescribeVpcs,
    CreateVpc,
    DeleteVpc,
    CreateTags,
    DeleteTags,
    DescribeSecurityGroups,
    CreateSecurityGroup,
    DeleteSecurityGroup,
    DescribeSecurityGroupRules,
    AuthorizeSecurityGroupIngress,
    RevokeSecurityGroupIngress,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DescribeVpcs => "DescribeVpcs",
            Self::CreateVpc => "CreateVpc",
            Self::DeleteVpc => "DeleteVpc",
            Self::CreateTags => "CreateTags",
            Self::DeleteTags => "DeleteTags",
            Self::DescribeSecurityGroups => "DescribeSecurityGroups",
            Self::CreateSecurityGroup => "CreateSecurityGroup",
            Self::DeleteSecurityGroup => "DeleteSecurityGroup",
            Self::DescribeSecurityGroupRules => "DescribeSecurityGroupRules",
            Self::AuthorizeSecurityGroupIngress => "AuthorizeSecurityGroupIngress",
            Self::RevokeSecurityGroupIngress => "RevokeSecurityGroupIngress",
        }
    }

    /// Whether the operation only reads state
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::DescribeVpcs | Self::DescribeSecurityGroups | Self::DescribeSecurityGroupRules
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure injected into an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    AccessDenied,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcRecord {
    pub id: String,
    pub cidr: String,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRecord {
    pub id: String,
    pub group_name: String,
    pub description: String,
    pub vpc_id: String,
    #[serde(default)]
    pub tags: Tags,
}

/// One ingress permission of a security group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPermission {
    pub id: String,
    pub group_id: String,
    pub protocol: String,
    pub from_port: Option<i64>,
    pub to_port: Option<i64>,
    pub cidr: Option<String>,
}

impl PortRange for IpPermission {
    fn from_port(&self) -> Option<i64> {
        self.from_port
    }

    fn to_port(&self) -> Option<i64> {
        self.to_port
    }
}

impl fmt::Display for IpPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.protocol)?;
        match (self.from_port, self.to_port) {
            (Some(from), Some(to)) => write!(f, " {from}-{to}")?,
            (Some(from), None) => write!(f, " {from}-")?,
            (None, Some(to)) => write!(f, " -{to}")?,
            (None, None) => {}
        }
        if let Some(cidr) = &self.cidr {
            write!(f, " from {cidr}")?;
        }
        Ok(())
    }
}

/// Request for a new ingress permission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRequest {
    pub protocol: String,
    pub from_port: Option<i64>,
    pub to_port: Option<i64>,
    pub cidr: Option<String>,
}

impl IngressRequest {
    fn same_as(&self, permission: &IpPermission) -> bool {
        self.protocol == permission.protocol
            && self.from_port == permission.from_port
            && self.to_port == permission.to_port
            && self.cidr == permission.cidr
    }
}

/// Everything the provider stores; serializable for persistence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudState {
    #[serde(default)]
    pub vpcs: BTreeMap<String, VpcRecord>,
    #[serde(default)]
    pub security_groups: BTreeMap<String, SecurityGroupRecord>,
    #[serde(default)]
    pub permissions: BTreeMap<String, IpPermission>,
    #[serde(default)]
    pub next_id: u64,
}

impl CloudState {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:08x}", self.next_id)
    }

    fn tags_mut(&mut self, id: &str) -> Result<&mut Tags> {
        if let Some(vpc) = self.vpcs.get_mut(id) {
            return Ok(&mut vpc.tags);
        }
        if let Some(group) = self.security_groups.get_mut(id) {
            return Ok(&mut group.tags);
        }
        Err(CloudError::NotFound {
            kind: "resource",
            id: id.to_string(),
        })
    }
}

/// Thread-safe in-memory provider
#[derive(Debug, Default)]
pub struct MockCloud {
    state: Mutex<CloudState>,
    faults: Mutex<HashMap<Operation, Fault>>,
    calls: Mutex<BTreeMap<Operation, usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously captured state
    pub fn from_state(state: CloudState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> CloudState {
        lock(&self.state).clone()
    }

    /// Make every later call of `operation` fail
    pub fn inject(&self, operation: Operation, fault: Fault) {
        lock(&self.faults).insert(operation, fault);
    }

    pub fn clear_fault(&self, operation: Operation) {
        lock(&self.faults).remove(&operation);
    }

    /// Number of calls made to `operation`, failed ones included
    pub fn calls(&self, operation: Operation) -> usize {
        lock(&self.calls).get(&operation).copied().unwrap_or(0)
    }

    /// Number of calls made to any operation
    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    /// Number of calls made to operations that change state
    pub fn mutating_calls(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|(operation, _)| !operation.is_read())
            .map(|(_, count)| count)
            .sum()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Count the call, apply any injected fault, and lock the state
    fn enter(&self, operation: Operation) -> Result<MutexGuard<'_, CloudState>> {
        *lock(&self.calls).entry(operation).or_default() += 1;
        log::trace!("mock cloud: {operation}");

        match lock(&self.faults).get(&operation) {
            Some(Fault::AccessDenied) => Err(AccessDenied::new(operation.as_str()).into()),
            Some(Fault::Unavailable) => Err(CloudError::Unavailable {
                operation: operation.as_str(),
            }),
            None => Ok(lock(&self.state)),
        }
    }

    pub fn describe_vpcs(&self) -> Result<Vec<VpcRecord>> {
        let state = self.enter(Operation::DescribeVpcs)?;
        Ok(state.vpcs.values().cloned().collect())
    }

    pub fn create_vpc(&self, cidr: &str, tags: &Tags) -> Result<VpcRecord> {
        let mut state = self.enter(Operation::CreateVpc)?;
        let record = VpcRecord {
            id: state.allocate("vpc"),
            cidr: cidr.to_string(),
            tags: tags.clone(),
        };
        state.vpcs.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Delete a VPC; fails while security groups still live in it
    pub fn delete_vpc(&self, id: &str) -> Result<()> {
        let mut state = self.enter(Operation::DeleteVpc)?;
        if !state.vpcs.contains_key(id) {
            return Err(CloudError::NotFound {
                kind: "vpc",
                id: id.to_string(),
            });
        }
        if let Some(group) = state.security_groups.values().find(|g| g.vpc_id == id) {
            return Err(CloudError::DependencyViolation {
                id: id.to_string(),
                dependent: group.id.clone(),
            });
        }
        state.vpcs.remove(id);
        Ok(())
    }

    /// Add or overwrite tags on a VPC or security group
    pub fn create_tags(&self, id: &str, tags: &Tags) -> Result<()> {
        let mut state = self.enter(Operation::CreateTags)?;
        let existing = state.tags_mut(id)?;
        for (key, value) in tags {
            existing.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Remove tag keys from a VPC or security group
    pub fn delete_tags(&self, id: &str, keys: &[String]) -> Result<()> {
        let mut state = self.enter(Operation::DeleteTags)?;
        let existing = state.tags_mut(id)?;
        for key in keys {
            existing.remove(key);
        }
        Ok(())
    }

    pub fn describe_security_groups(&self) -> Result<Vec<SecurityGroupRecord>> {
        let state = self.enter(Operation::DescribeSecurityGroups)?;
        Ok(state.security_groups.values().cloned().collect())
    }

    /// Create a security group; names are unique within a VPC
    pub fn create_security_group(
        &self,
        group_name: &str,
        description: &str,
        vpc_id: &str,
        tags: &Tags,
    ) -> Result<SecurityGroupRecord> {
        let mut state = self.enter(Operation::CreateSecurityGroup)?;
        if !state.vpcs.contains_key(vpc_id) {
            return Err(CloudError::NotFound {
                kind: "vpc",
                id: vpc_id.to_string(),
            });
        }
        if state
            .security_groups
            .values()
            .any(|g| g.vpc_id == vpc_id && g.group_name == group_name)
        {
            return Err(CloudError::Duplicate {
                kind: "security group",
                id: group_name.to_string(),
            });
        }

        let record = SecurityGroupRecord {
            id: state.allocate("sg"),
            group_name: group_name.to_string(),
            description: description.to_string(),
            vpc_id: vpc_id.to_string(),
            tags: tags.clone(),
        };
        state
            .security_groups
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Delete a security group together with its permissions
    pub fn delete_security_group(&self, id: &str) -> Result<()> {
        let mut state = self.enter(Operation::DeleteSecurityGroup)?;
        if state.security_groups.remove(id).is_none() {
            return Err(CloudError::NotFound {
                kind: "security group",
                id: id.to_string(),
            });
        }
        state.permissions.retain(|_, p| p.group_id != id);
        Ok(())
    }

    /// Ingress permissions of one security group
    pub fn describe_ingress(&self, group_id: &str) -> Result<Vec<IpPermission>> {
        let state = self.enter(Operation::DescribeSecurityGroupRules)?;
        if !state.security_groups.contains_key(group_id) {
            return Err(CloudError::NotFound {
                kind: "security group",
                id: group_id.to_string(),
            });
        }
        Ok(state
            .permissions
            .values()
            .filter(|p| p.group_id == group_id)
            .cloned()
            .collect())
    }

    pub fn authorize_ingress(&self, group_id: &str, request: &IngressRequest) -> Result<IpPermission> {
        let mut state = self.enter(Operation::AuthorizeSecurityGroupIngress)?;
        if !state.security_groups.contains_key(group_id) {
            return Err(CloudError::NotFound {
                kind: "security group",
                id: group_id.to_string(),
            });
        }
        if let Some(existing) = state
            .permissions
            .values()
            .find(|p| p.group_id == group_id && request.same_as(p))
        {
            return Err(CloudError::Duplicate {
                kind: "permission",
                id: existing.id.clone(),
            });
        }

        let permission = IpPermission {
            id: state.allocate("sgr"),
            group_id: group_id.to_string(),
            protocol: request.protocol.clone(),
            from_port: request.from_port,
            to_port: request.to_port,
            cidr: request.cidr.clone(),
        };
        state
            .permissions
            .insert(permission.id.clone(), permission.clone());
        Ok(permission)
    }

    pub fn revoke_ingress(&self, permission_id: &str) -> Result<()> {
        let mut state = self.enter(Operation::RevokeSecurityGroupIngress)?;
        if state.permissions.remove(permission_id).is_none() {
            return Err(CloudError::NotFound {
                kind: "permission",
                id: permission_id.to_string(),
            });
        }
        Ok(())
    }
}
