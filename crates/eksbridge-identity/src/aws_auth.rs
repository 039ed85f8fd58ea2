//! aws-auth bootstrap ConfigMap
//!
//! The ConfigMap holds two YAML lists under `data`:
//!
//! ```yaml
//! mapUsers: |
//!   - userarn: arn:aws:iam::123456789012:user/alice
//!     username: alice
//!     groups: [readers]
//! mapRoles: |
//!   - rolearn: arn:aws:iam::123456789012:role/deployer
//!     groups: [system:masters]
//! ```
//!
//! Reading is best effort: a row that does not parse is skipped and the rest
//! of the document still counts. Writing is strict: a section that does not
//! parse as a list is never overwritten.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use eksbridge_common::arn::{self, PrincipalKind};
use eksbridge_common::Error;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::directory::{ResolvedUsername, UsernameDirectory};
use crate::mappings::{IdentityMappings, MappingSource};
use crate::Result;

/// Data key of the user mapping list
pub const MAP_USERS_KEY: &str = "mapUsers";

/// Data key of the role mapping list
pub const MAP_ROLES_KEY: &str = "mapRoles";

/// One row of `mapUsers`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMapping {
    /// IAM user ARN
    #[serde(rename = "userarn")]
    pub user_arn: String,
    /// Kubernetes username; the ARN itself when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Kubernetes groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

/// One row of `mapRoles`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMapping {
    /// IAM role ARN
    #[serde(rename = "rolearn")]
    pub role_arn: String,
    /// Kubernetes username; the ARN itself when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Kubernetes groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

/// A mapping row of either list, normalized
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappingRow {
    /// Principal ARN
    pub principal: String,
    /// Username, if the row names one
    pub username: Option<String>,
    /// Groups the principal is placed into
    pub groups: Vec<String>,
}

impl MappingRow {
    /// Username the row maps to (the ARN when absent or empty)
    pub fn effective_username(&self) -> &str {
        match self.username.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.principal,
        }
    }
}

impl From<UserMapping> for MappingRow {
    fn from(row: UserMapping) -> Self {
        Self {
            principal: row.user_arn,
            username: row.username,
            groups: row.groups.unwrap_or_default(),
        }
    }
}

impl From<RoleMapping> for MappingRow {
    fn from(row: RoleMapping) -> Self {
        Self {
            principal: row.role_arn,
            username: row.username,
            groups: row.groups.unwrap_or_default(),
        }
    }
}

/// The data of the aws-auth ConfigMap plus the version it was read at
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AwsAuthConfigMap {
    /// ConfigMap namespace
    pub namespace: String,
    /// ConfigMap name
    pub name: String,
    /// resourceVersion observed on read; sent back on update
    pub resource_version: Option<String>,
    /// Raw `data` entries
    pub data: BTreeMap<String, String>,
}

impl AwsAuthConfigMap {
    /// Build from a ConfigMap read from the cluster
    pub fn from_config_map(cm: ConfigMap) -> Self {
        Self {
            namespace: cm.metadata.namespace.unwrap_or_default(),
            name: cm.metadata.name.unwrap_or_default(),
            resource_version: cm.metadata.resource_version,
            data: cm.data.unwrap_or_default(),
        }
    }

    /// Every parseable row of `mapUsers`, in document order
    pub fn user_rows(&self) -> Vec<MappingRow> {
        self.rows::<UserMapping>(MAP_USERS_KEY)
    }

    /// Every parseable row of `mapRoles`, in document order
    pub fn role_rows(&self) -> Vec<MappingRow> {
        self.rows::<RoleMapping>(MAP_ROLES_KEY)
    }

    fn rows<T>(&self, key: &str) -> Vec<MappingRow>
    where
        T: serde::de::DeserializeOwned + Into<MappingRow>,
    {
        let values = match self.section(key) {
            Ok(values) => values,
            Err(e) => {
                warn!(configmap = %self.name, key, error = %e, "ignoring unparseable mapping list");
                return Vec::new();
            }
        };

        values
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_yaml::from_value::<T>(value) {
                Ok(row) => Some(row.into()),
                Err(e) => {
                    warn!(configmap = %self.name, key, index, error = %e, "skipping malformed mapping row");
                    None
                }
            })
            .filter(|row: &MappingRow| !row.principal.is_empty())
            .collect()
    }

    /// Parse one section as a raw YAML list; absent or blank means empty
    fn section(&self, key: &str) -> Result<Vec<serde_yaml::Value>> {
        match self.data.get(key) {
            Some(raw) if !raw.trim().is_empty() => serde_yaml::from_str(raw)
                .map_err(|e| Error::malformed(format!("{}/{} {key}", self.namespace, self.name), e.to_string())),
            _ => Ok(Vec::new()),
        }
    }

    /// Fold both lists into identity mappings
    pub fn mappings(&self) -> IdentityMappings {
        let mut mappings = IdentityMappings::default();
        for row in self.user_rows().into_iter().chain(self.role_rows()) {
            mappings.record(&row.principal, row.username.as_deref(), &row.groups);
        }
        mappings
    }

    /// Username mapped to a principal by the first row naming it
    pub fn find_username(&self, principal: &str) -> Option<String> {
        self.user_rows()
            .into_iter()
            .chain(self.role_rows())
            .find(|row| row.principal == principal)
            .map(|row| row.effective_username().to_string())
    }

    /// Append a self-mapping row for a user or role
    ///
    /// Users go to `mapUsers`, roles to `mapRoles`. Existing rows are kept
    /// as parsed, including fields eksbridge does not know about.
    pub fn append_self_mapping(&mut self, principal: &str) -> Result<()> {
        let (key, row) = match arn::classify(principal) {
            PrincipalKind::User => (
                MAP_USERS_KEY,
                to_value(&UserMapping {
                    user_arn: principal.to_string(),
                    username: Some(principal.to_string()),
                    groups: None,
                })?,
            ),
            PrincipalKind::Role => (
                MAP_ROLES_KEY,
                to_value(&RoleMapping {
                    role_arn: principal.to_string(),
                    username: Some(principal.to_string()),
                    groups: None,
                })?,
            ),
            PrincipalKind::Unsupported => {
                return Err(Error::validation_for_field(
                    "principal",
                    format!("{principal} is not an IAM user or role"),
                ))
            }
        };

        let mut values = self.section(key)?;
        values.push(row);
        let rendered = serde_yaml::to_string(&values).map_err(|e| {
            Error::internal_with_context("aws-auth", format!("failed to render {key}: {e}"))
        })?;
        self.data.insert(key.to_string(), rendered);
        Ok(())
    }
}

fn to_value<T: Serialize>(row: &T) -> Result<serde_yaml::Value> {
    serde_yaml::to_value(row)
        .map_err(|e| Error::internal_with_context("aws-auth", format!("failed to encode row: {e}")))
}

// =============================================================================
// Store
// =============================================================================

/// Read/write access to the aws-auth ConfigMap
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AuthConfigStore: Send + Sync {
    /// Fetch the ConfigMap, `None` if it does not exist
    async fn get_aws_auth(&self) -> Result<Option<AwsAuthConfigMap>>;

    /// Write the ConfigMap data back, failing with a conflict if it changed
    /// since `resource_version` was read
    async fn update_aws_auth(&self, config: &AwsAuthConfigMap) -> Result<()>;
}

/// aws-auth store backed by the Kubernetes API
pub struct KubeAuthConfigStore {
    client: Client,
    namespace: String,
    name: String,
}

impl KubeAuthConfigStore {
    /// Create a store for the ConfigMap `namespace/name`
    pub fn new(client: Client, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl AuthConfigStore for KubeAuthConfigStore {
    async fn get_aws_auth(&self) -> Result<Option<AwsAuthConfigMap>> {
        match self.api().get(&self.name).await {
            Ok(cm) => Ok(Some(AwsAuthConfigMap::from_config_map(cm))),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(Error::kube(
                format!("get ConfigMap {}/{}", self.namespace, self.name),
                e,
            )),
        }
    }

    async fn update_aws_auth(&self, config: &AwsAuthConfigMap) -> Result<()> {
        // merge patch carrying resourceVersion: rejected with 409 on a concurrent write,
        // leaves labels, annotations and other data keys alone
        let patch = ConfigMap {
            metadata: ObjectMeta {
                resource_version: config.resource_version.clone(),
                ..Default::default()
            },
            data: Some(config.data.clone()),
            ..Default::default()
        };
        self.api()
            .patch(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                Error::kube(
                    format!("update ConfigMap {}/{}", self.namespace, self.name),
                    e,
                )
            })?;
        debug!(configmap = %self.name, namespace = %self.namespace, "updated aws-auth");
        Ok(())
    }
}

// =============================================================================
// Mapping source and username directory
// =============================================================================

/// Identity mappings and username resolution backed by the aws-auth ConfigMap
pub struct AwsAuthSource {
    store: Arc<dyn AuthConfigStore>,
}

impl AwsAuthSource {
    /// Create a source reading through the given store
    pub fn new(store: Arc<dyn AuthConfigStore>) -> Self {
        Self { store }
    }

    async fn load(&self) -> Result<AwsAuthConfigMap> {
        self.store
            .get_aws_auth()
            .await?
            .ok_or_else(|| Error::not_found("aws-auth ConfigMap"))
    }
}

#[async_trait]
impl MappingSource for AwsAuthSource {
    fn name(&self) -> &'static str {
        "aws-auth"
    }

    async fn read_mappings(&self) -> Result<IdentityMappings> {
        let config = self.load().await?;
        let mappings = config.mappings();
        debug!(
            users = mappings.users.len(),
            groups = mappings.groups.len(),
            "read aws-auth mappings"
        );
        Ok(mappings)
    }
}

#[async_trait]
impl UsernameDirectory for AwsAuthSource {
    async fn resolve_username(&self, principal: &str) -> Result<Option<String>> {
        Ok(self.load().await?.find_username(principal))
    }

    async fn resolve_or_create_username(&self, principal: &str) -> Result<ResolvedUsername> {
        if !arn::is_user_or_role(principal) {
            return Err(Error::validation_for_field(
                "principal",
                format!("{principal} is not an IAM user or role"),
            ));
        }

        let mut config = self.load().await?;
        if let Some(username) = config.find_username(principal) {
            return Ok(ResolvedUsername {
                username,
                created: false,
            });
        }

        config.append_self_mapping(principal)?;
        self.store.update_aws_auth(&config).await?;
        info!(principal = %principal, kind = %arn::classify(principal), "added aws-auth self-mapping");

        Ok(ResolvedUsername {
            username: principal.to_string(),
            created: true,
        })
    }
}
