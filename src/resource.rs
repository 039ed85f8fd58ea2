//! Host-neutral resource model: resource types, resources, entitlements, grants

use eksbridge_common::{EntitlementId, EntitlementScope, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use eksbridge_common::Page;

/// A kind of resource the connector syncs or grants to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceType {
    /// Stable id, used as the first segment of entitlement ids
    pub id: &'static str,
    /// Human-readable name
    pub display_name: &'static str,
    /// One-line description
    pub description: &'static str,
}

impl ResourceType {
    /// Kubernetes ClusterRole
    pub const CLUSTER_ROLE: ResourceType = ResourceType {
        id: "cluster_role",
        display_name: "Cluster Role",
        description: "Kubernetes ClusterRole",
    };

    /// Kubernetes namespaced Role
    pub const ROLE: ResourceType = ResourceType {
        id: "role",
        display_name: "Role",
        description: "Kubernetes Role",
    };

    /// EKS access policy
    pub const ACCESS_POLICY: ResourceType = ResourceType {
        id: "access_policy",
        display_name: "Access Policy",
        description: "EKS Access Policy",
    };

    /// AWS IAM role
    pub const IAM_ROLE: ResourceType = ResourceType {
        id: "iam_role",
        display_name: "IAM Role",
        description: "AWS IAM Role",
    };

    /// AWS IAM user
    pub const IAM_USER: ResourceType = ResourceType {
        id: "iam_user",
        display_name: "IAM User",
        description: "AWS IAM User",
    };

    /// Kubernetes ServiceAccount
    pub const SERVICE_ACCOUNT: ResourceType = ResourceType {
        id: "service_account",
        display_name: "Service Account",
        description: "Kubernetes ServiceAccount",
    };

    /// Kubernetes group
    pub const GROUP: ResourceType = ResourceType {
        id: "group",
        display_name: "Group",
        description: "Kubernetes group",
    };

    /// Every resource type the connector knows
    pub const ALL: [ResourceType; 7] = [
        Self::CLUSTER_ROLE,
        Self::ROLE,
        Self::ACCESS_POLICY,
        Self::IAM_ROLE,
        Self::IAM_USER,
        Self::SERVICE_ACCOUNT,
        Self::GROUP,
    ];
}

/// Identifier of one resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource type id
    pub resource_type: String,
    /// Id within the type (name, `<namespace>/<name>`, or ARN)
    pub resource: String,
}

impl ResourceId {
    /// Build an id of the given type
    pub fn new(resource_type: &ResourceType, resource: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.id.to_string(),
            resource: resource.into(),
        }
    }
}

/// A synced resource
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Identifier
    pub id: ResourceId,
    /// Human-readable name
    pub display_name: String,
    /// Free-form attributes shown to reviewers
    pub profile: Map<String, Value>,
}

/// Something a principal can be granted on a resource
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Encoded entitlement id
    pub id: String,
    /// Resource the entitlement belongs to
    pub resource: ResourceId,
    /// Human-readable name
    pub display_name: String,
    /// Description
    pub description: String,
    /// Resource type ids that can receive this entitlement
    pub grantable_to: Vec<String>,
}

impl Entitlement {
    /// Build an entitlement of `resource` with the given id
    pub fn new(
        resource: &Resource,
        id: &EntitlementId,
        display_name: String,
        description: String,
        grantable_to: &[ResourceType],
    ) -> Self {
        Self {
            id: id.to_string(),
            resource: resource.id.clone(),
            display_name,
            description,
            grantable_to: grantable_to.iter().map(|t| t.id.to_string()).collect(),
        }
    }
}

/// An observed entitlement held by a principal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Encoded entitlement id
    pub entitlement: String,
    /// Principal holding it
    pub principal: ResourceId,
    /// Entitlements whose holders also hold this one (role trust)
    pub expandable: Vec<String>,
}

impl Grant {
    /// A grant with no expansion
    pub fn new(entitlement: &EntitlementId, principal: ResourceId) -> Self {
        Self {
            entitlement: entitlement.to_string(),
            principal,
            expandable: Vec::new(),
        }
    }

    /// Also grant to everyone holding `entitlement`
    pub fn expandable_by(mut self, entitlement: &EntitlementId) -> Self {
        self.expandable.push(entitlement.to_string());
        self
    }
}

/// Decode an `assigned` entitlement id of the given resource type
///
/// Returns the resource id and scope it names.
pub fn decode_assigned(raw: &str, resource_type: &ResourceType) -> Result<(String, EntitlementScope)> {
    let id = EntitlementId::decode(raw)?;
    if id.kind() != resource_type.id {
        return Err(Error::invalid_entitlement(
            raw,
            format!("expected a {} entitlement", resource_type.id),
        ));
    }
    let resource = id.resource().to_string();
    let scope = id.expect_assigned(resource_type.id, &resource)?.clone();
    Ok((resource, scope))
}

/// ARN of a grant principal, which must be an IAM user or role
pub fn principal_arn(principal: &ResourceId) -> Result<&str> {
    if principal.resource_type == ResourceType::IAM_USER.id
        || principal.resource_type == ResourceType::IAM_ROLE.id
    {
        Ok(&principal.resource)
    } else {
        Err(Error::validation_for_field(
            "principal",
            format!("principal type {} is not supported", principal.resource_type),
        ))
    }
}
