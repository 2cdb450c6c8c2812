//! Network resource tasks implemented on the mock provider

mod security_group;
mod security_group_rule;
mod vpc;

pub use security_group::{RevokeIngress, SecurityGroup};
pub use security_group_rule::SecurityGroupRule;
pub use vpc::Vpc;

use crate::cloud::{MockCloud, Tags};
use anyhow::Context;

/// Make the tags of object `id` equal `desired`
fn sync_tags(cloud: &MockCloud, id: &str, desired: &Tags, actual: &Tags) -> anyhow::Result<()> {
    let changed: Tags = desired
        .iter()
        .filter(|(key, value)| actual.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let removed: Vec<String> = actual
        .keys()
        .filter(|key| !desired.contains_key(*key))
        .cloned()
        .collect();

    if !changed.is_empty() {
        cloud
            .create_tags(id, &changed)
            .with_context(|| format!("tagging {id}"))?;
    }
    if !removed.is_empty() {
        cloud
            .delete_tags(id, &removed)
            .with_context(|| format!("removing tags from {id}"))?;
    }
    Ok(())
}

/// Tag map with the conventional `Name` tag set
fn named(name: &str) -> Tags {
    let mut tags = Tags::new();
    tags.insert("Name".to_string(), name.to_string());
    tags
}
