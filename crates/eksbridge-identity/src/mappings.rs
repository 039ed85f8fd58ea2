//! Username and group mappings read from one identity source

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Kubernetes usernames and groups, each mapped to the IAM principals behind them
///
/// Principal lists keep the order in which rows were read and may contain
/// duplicates; consumers treat them as bags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityMappings {
    /// Kubernetes username -> principal ARNs
    pub users: BTreeMap<String, Vec<String>>,
    /// Kubernetes group -> principal ARNs
    pub groups: BTreeMap<String, Vec<String>>,
}

impl IdentityMappings {
    /// Record one mapping row
    ///
    /// A missing or empty username maps the principal to itself.
    pub fn record(&mut self, principal: &str, username: Option<&str>, groups: &[String]) {
        let username = match username {
            Some(name) if !name.is_empty() => name,
            _ => principal,
        };
        self.users
            .entry(username.to_string())
            .or_default()
            .push(principal.to_string());
        for group in groups.iter().filter(|g| !g.is_empty()) {
            self.groups
                .entry(group.clone())
                .or_default()
                .push(principal.to_string());
        }
    }

    /// Append every mapping of `other` after the ones already held
    pub fn merge(&mut self, other: IdentityMappings) {
        for (username, principals) in other.users {
            self.users.entry(username).or_default().extend(principals);
        }
        for (group, principals) in other.groups {
            self.groups.entry(group).or_default().extend(principals);
        }
    }

    /// Principals mapped to a username (empty if none)
    pub fn principals_for_username(&self, username: &str) -> &[String] {
        self.users.get(username).map(Vec::as_slice).unwrap_or_default()
    }

    /// Principals mapped into a group (empty if none)
    pub fn principals_for_group(&self, group: &str) -> &[String] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or_default()
    }

    /// True if no source contributed any mapping
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }
}

/// A source of identity mappings (aws-auth ConfigMap, EKS access entries)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MappingSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Read every mapping currently held by the source
    async fn read_mappings(&self) -> Result<IdentityMappings>;
}
