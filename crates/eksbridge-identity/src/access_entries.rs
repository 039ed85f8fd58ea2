//! EKS access entries as an identity mapping source

use std::sync::Arc;

use async_trait::async_trait;
use eksbridge_common::{arn, Page};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mappings::{IdentityMappings, MappingSource};
use crate::Result;

/// Access entry type that maps a principal to Kubernetes identities
///
/// Node and Fargate entry types are managed by EKS and carry no username.
pub const STANDARD_ENTRY_TYPE: &str = "STANDARD";

/// Detail of one access entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    /// IAM principal the entry belongs to
    pub principal_arn: String,
    /// Entry type (`STANDARD`, `EC2_LINUX`, `FARGATE_LINUX`, ...)
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Kubernetes username, if one was set
    pub username: Option<String>,
    /// Kubernetes groups
    #[serde(default)]
    pub kubernetes_groups: Vec<String>,
}

/// Cluster access entries held by the EKS control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccessEntryRegistry: Send + Sync {
    /// One page of principal ARNs that have an access entry
    async fn list_access_entries(&self, next_token: Option<String>) -> Result<Page<String>>;

    /// Describe the entry of one principal, `None` if it vanished
    async fn describe_access_entry(&self, principal: &str) -> Result<Option<AccessEntry>>;
}

/// Identity mappings read from access entries
pub struct AccessEntrySource {
    registry: Arc<dyn AccessEntryRegistry>,
}

impl AccessEntrySource {
    /// Create a source reading through the given registry
    pub fn new(registry: Arc<dyn AccessEntryRegistry>) -> Self {
        Self { registry }
    }

    /// Every principal with an access entry, following the cursor to the end
    async fn list_all(&self) -> Result<Vec<String>> {
        let mut principals = Vec::new();
        let mut next_token = None;
        loop {
            let page = self.registry.list_access_entries(next_token).await?;
            principals.extend(page.items);
            next_token = eksbridge_common::next_token(page.next_token);
            if next_token.is_none() {
                return Ok(principals);
            }
        }
    }
}

#[async_trait]
impl MappingSource for AccessEntrySource {
    fn name(&self) -> &'static str {
        "access-entries"
    }

    async fn read_mappings(&self) -> Result<IdentityMappings> {
        let mut mappings = IdentityMappings::default();

        for principal in self.list_all().await? {
            if !arn::is_user_or_role(&principal) {
                debug!(principal = %principal, "skipping access entry for non user/role principal");
                continue;
            }

            let entry = match self.registry.describe_access_entry(&principal).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!(principal = %principal, error = %e, "skipping access entry that could not be described");
                    continue;
                }
            };

            if entry.entry_type != STANDARD_ENTRY_TYPE {
                continue;
            }

            mappings.record(
                &entry.principal_arn,
                entry.username.as_deref(),
                &entry.kubernetes_groups,
            );
        }

        debug!(
            users = mappings.users.len(),
            groups = mappings.groups.len(),
            "read access entry mappings"
        );
        Ok(mappings)
    }
}
