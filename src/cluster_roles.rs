//! ClusterRoles as resources, provisioned through RBAC bindings

use std::sync::Arc;

use eksbridge_common::{EntitlementId, EntitlementScope, GrantOutcome, RevokeOutcome};
use eksbridge_identity::IdentityLookup;
use eksbridge_rbac::{BindingInspector, BindingReconciler, BindingScope, RoleTarget};
use k8s_openapi::api::rbac::v1::ClusterRole;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cluster_reader::ClusterReader;
use crate::grants::binding_grants;
use crate::namespaces::NamespaceCache;
use crate::resource::{
    decode_assigned, principal_arn, Entitlement, Grant, Page, Resource, ResourceId, ResourceType,
};
use crate::Result;

/// Resource types a cluster role entitlement can be granted to
const GRANTABLE_TO: [ResourceType; 4] = [
    ResourceType::IAM_USER,
    ResourceType::IAM_ROLE,
    ResourceType::SERVICE_ACCOUNT,
    ResourceType::GROUP,
];

/// Lists ClusterRoles and grants them at cluster or namespace scope
pub struct ClusterRoleSyncer {
    reader: Arc<dyn ClusterReader>,
    namespaces: Arc<NamespaceCache>,
    inspector: Arc<dyn BindingInspector>,
    lookup: Arc<dyn IdentityLookup>,
    reconciler: Arc<BindingReconciler>,
}

impl ClusterRoleSyncer {
    /// Create a syncer over the shared collaborators
    pub fn new(
        reader: Arc<dyn ClusterReader>,
        namespaces: Arc<NamespaceCache>,
        inspector: Arc<dyn BindingInspector>,
        lookup: Arc<dyn IdentityLookup>,
        reconciler: Arc<BindingReconciler>,
    ) -> Self {
        Self {
            reader,
            namespaces,
            inspector,
            lookup,
            reconciler,
        }
    }

    /// One page of ClusterRole resources
    pub async fn list(&self, continue_token: Option<String>) -> Result<Page<Resource>> {
        let page = self.reader.list_cluster_roles(continue_token).await?;
        let mut resources = Vec::with_capacity(page.items.len());
        for role in &page.items {
            match cluster_role_resource(role) {
                Some(resource) => resources.push(resource),
                None => warn!(uid = ?role.metadata.uid, "skipping ClusterRole without a usable name or profile"),
            }
        }
        debug!(count = resources.len(), "listed cluster roles");
        Ok(Page {
            items: resources,
            next_token: page.next_token,
        })
    }

    /// Cluster-wide membership plus one membership per namespace
    pub async fn entitlements(&self, resource: &Resource) -> Result<Vec<Entitlement>> {
        let name = &resource.display_name;
        let kind = ResourceType::CLUSTER_ROLE.id;
        let namespaces = self.namespaces.names().await?;

        let mut entitlements = Vec::with_capacity(namespaces.len() + 1);
        entitlements.push(Entitlement::new(
            resource,
            &EntitlementId::assigned(kind, &resource.id.resource, EntitlementScope::Cluster),
            format!("{name} Cluster Role Member"),
            format!("Grants membership to the {name} cluster role"),
            &GRANTABLE_TO,
        ));
        for ns in namespaces.iter() {
            entitlements.push(Entitlement::new(
                resource,
                &EntitlementId::assigned(
                    kind,
                    &resource.id.resource,
                    EntitlementScope::Namespace(ns.clone()),
                ),
                format!("{name} Cluster Role Member in {ns} namespace"),
                format!("Grants membership to the {name} cluster role in namespace {ns}"),
                &GRANTABLE_TO,
            ));
        }
        Ok(entitlements)
    }

    /// Grants held through ClusterRoleBindings and RoleBindings of the role
    pub async fn grants(&self, resource: &Resource) -> Result<Vec<Grant>> {
        let role = RoleTarget::cluster_role(&resource.id.resource);
        let matching = self.inspector.matching_bindings(&role).await?;
        if matching.is_empty() {
            debug!(role = %role, "no bindings found");
            return Ok(Vec::new());
        }
        binding_grants(
            self.lookup.as_ref(),
            &ResourceType::CLUSTER_ROLE,
            &resource.id.resource,
            &matching.into_bindings(),
        )
        .await
    }

    /// Bind `principal` to the role at the entitlement's scope
    pub async fn grant(&self, principal: &ResourceId, entitlement: &str) -> Result<GrantOutcome> {
        let (role, scope) = decode_target(entitlement)?;
        self.reconciler
            .grant(principal_arn(principal)?, &role, &scope)
            .await
    }

    /// Unbind `principal` from the role at the entitlement's scope
    pub async fn revoke(&self, principal: &ResourceId, entitlement: &str) -> Result<RevokeOutcome> {
        let (role, scope) = decode_target(entitlement)?;
        self.reconciler
            .revoke(principal_arn(principal)?, &role, &scope)
            .await
    }
}

fn decode_target(entitlement: &str) -> Result<(RoleTarget, BindingScope)> {
    let (name, scope) = decode_assigned(entitlement, &ResourceType::CLUSTER_ROLE)?;
    Ok((RoleTarget::cluster_role(name), BindingScope::from(&scope)))
}

fn to_value<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

fn cluster_role_resource(role: &ClusterRole) -> Option<Resource> {
    let meta = &role.metadata;
    let name = meta.name.clone().filter(|n| !n.is_empty())?;

    let mut profile = Map::new();
    profile.insert("name".into(), Value::String(name.clone()));
    profile.insert(
        "uid".into(),
        Value::String(meta.uid.clone().unwrap_or_default()),
    );
    if let Some(created) = &meta.creation_timestamp {
        profile.insert("creationTimestamp".into(), to_value(created)?);
    }
    profile.insert(
        "labels".into(),
        to_value(&meta.labels.clone().unwrap_or_default())?,
    );
    profile.insert(
        "annotations".into(),
        to_value(&meta.annotations.clone().unwrap_or_default())?,
    );
    if let Some(rule) = &role.aggregation_rule {
        profile.insert("aggregationRule".into(), to_value(rule)?);
    }

    Some(Resource {
        id: ResourceId::new(&ResourceType::CLUSTER_ROLE, &name),
        display_name: name,
        profile,
    })
}
