//! # Mockcloud
//!
//! An in-memory cloud provider and a small catalog of network tasks built
//! on the `converge` engine.
//!
//! The provider keeps VPCs, security groups and ingress permissions in
//! memory, counts every call and can be told to fail specific operations.
//! The tasks ([`Vpc`], [`SecurityGroup`], [`SecurityGroupRule`]) implement
//! the engine's find / diff / render protocol against it.
//!
//! ## Example
//!
//! ```
//! use converge::{ApiTarget, RunOptions, TaskSet, check_no_changes, run_tasks};
//! use mockcloud::{MockCloud, SecurityGroup, Vpc};
//! use std::sync::Arc;
//!
//! let cloud = MockCloud::new();
//! let build = || {
//!     let vpc = Arc::new(Vpc::new("main").cidr("10.0.0.0/16"));
//!     let sg = Arc::new(SecurityGroup::new("web", &vpc).description("web tier"));
//!     let mut tasks = TaskSet::new();
//!     tasks.insert(sg).unwrap();
//!     tasks.insert(vpc).unwrap();
//!     tasks
//! };
//!
//! let report = run_tasks(&cloud, &ApiTarget, &build(), RunOptions::default()).unwrap();
//! assert!(report.is_success());
//! assert!(check_no_changes(&cloud, &build(), RunOptions::default()).is_ok());
//! ```

pub mod cloud;
pub mod error;
pub mod tasks;

#[cfg(test)]
mod scenarios;

// Re-export main types at crate root
pub use cloud::{
    CloudState, Fault, IngressRequest, IpPermission, MockCloud, Operation, SecurityGroupRecord,
    Tags, VpcRecord,
};
pub use error::{CloudError, Result};
pub use tasks::{RevokeIngress, SecurityGroup, SecurityGroupRule, Vpc};
