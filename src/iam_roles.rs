//! IAM roles as resources, with trust-policy grants

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use eksbridge_common::arn::{self, PrincipalKind};
use eksbridge_common::{EntitlementId, Error};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::resource::{Entitlement, Grant, Page, Resource, ResourceId, ResourceType};
use crate::trust_policy;
use crate::Result;

/// An IAM role as reported by the registry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamRole {
    /// Role name
    pub role_name: String,
    /// Stable role id
    pub role_id: String,
    /// Role ARN
    pub arn: String,
    /// Role path, when reported
    pub path: Option<String>,
    /// Creation time, when reported
    pub create_date: Option<DateTime<Utc>>,
}

/// IAM role listing and trust policies
///
/// Implementations skip (and log) roles that lack a name, id or ARN.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RoleRegistry: Send + Sync {
    /// One page of roles
    async fn list_roles(&self, marker: Option<String>) -> Result<Page<IamRole>>;

    /// A single role by name
    async fn get_role(&self, role_name: &str) -> Result<IamRole>;

    /// The role's trust policy document, URL-encoded JSON
    async fn get_trust_policy(&self, role_name: &str) -> Result<String>;
}

/// Lists IAM roles and the users their trust policies allow
pub struct IamRoleSyncer {
    registry: Arc<dyn RoleRegistry>,
}

impl IamRoleSyncer {
    /// Create a syncer over `registry`
    pub fn new(registry: Arc<dyn RoleRegistry>) -> Self {
        Self { registry }
    }

    /// One page of IAM role resources
    pub async fn list(&self, marker: Option<String>) -> Result<Page<Resource>> {
        let page = self.registry.list_roles(marker).await?;
        Ok(page.map(|role| role_resource(&role)))
    }

    /// A single IAM role resource by name
    pub async fn get(&self, role_name: &str) -> Result<Resource> {
        Ok(role_resource(&self.registry.get_role(role_name).await?))
    }

    /// The `assumes` entitlement of a role
    pub fn entitlements(&self, resource: &Resource) -> Vec<Entitlement> {
        let id = EntitlementId::assumes(ResourceType::IAM_ROLE.id, &resource.id.resource);
        vec![Entitlement::new(
            resource,
            &id,
            format!("{} Role", resource.display_name),
            format!("Can assume the {} role in AWS", resource.display_name),
            &[ResourceType::IAM_USER],
        )]
    }

    /// IAM users the role's trust policy allows to assume it
    ///
    /// A trust policy that cannot be fetched or parsed yields no grants.
    pub async fn grants(&self, resource: &Resource) -> Result<Vec<Grant>> {
        let role_arn = resource.id.resource.as_str();
        let role_name = arn::role_name_from_arn(role_arn).ok_or_else(|| {
            Error::validation_for_field("resource", format!("not a role ARN: {role_arn}"))
        })?;

        let document = match self.registry.get_trust_policy(role_name).await {
            Ok(document) => document,
            Err(e) => {
                warn!(role = %role_name, error = %e, "failed to fetch trust policy, skipping role");
                return Ok(Vec::new());
            }
        };
        let principals = match trust_policy::trusted_principals(&document) {
            Ok(principals) => principals,
            Err(e) => {
                warn!(role = %role_name, error = %e, "unreadable trust policy, skipping role");
                return Ok(Vec::new());
            }
        };

        let entitlement = EntitlementId::assumes(ResourceType::IAM_ROLE.id, role_arn);
        let grants: Vec<Grant> = principals
            .into_iter()
            .filter(|p| p != "*" && arn::classify(p) == PrincipalKind::User)
            .map(|p| Grant::new(&entitlement, ResourceId::new(&ResourceType::IAM_USER, p)))
            .collect();
        debug!(role = %role_name, grants = grants.len(), "read trust policy grants");
        Ok(grants)
    }
}

fn role_resource(role: &IamRole) -> Resource {
    let mut profile = Map::new();
    profile.insert("role_name".into(), Value::String(role.role_name.clone()));
    profile.insert("role_id".into(), Value::String(role.role_id.clone()));
    profile.insert("arn".into(), Value::String(role.arn.clone()));
    if let Some(path) = &role.path {
        profile.insert("path".into(), Value::String(path.clone()));
    }
    if let Some(created) = role.create_date {
        profile.insert(
            "create_date".into(),
            Value::String(created.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
    }
    Resource {
        id: ResourceId::new(&ResourceType::IAM_ROLE, &role.arn),
        display_name: role.role_name.clone(),
        profile,
    }
}
