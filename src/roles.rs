//! Namespaced Roles as resources
//!
//! A Role is identified as `<namespace>/<name>` and can only be granted
//! in its own namespace.

use std::sync::Arc;

use eksbridge_common::{EntitlementId, EntitlementScope, Error, GrantOutcome, RevokeOutcome};
use eksbridge_identity::IdentityLookup;
use eksbridge_rbac::{BindingInspector, BindingReconciler, BindingScope, RoleTarget};
use k8s_openapi::api::rbac::v1::Role;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cluster_reader::ClusterReader;
use crate::grants::binding_grants;
use crate::resource::{
    decode_assigned, principal_arn, Entitlement, Grant, Page, Resource, ResourceId, ResourceType,
};
use crate::Result;

const GRANTABLE_TO: [ResourceType; 4] = [
    ResourceType::IAM_USER,
    ResourceType::IAM_ROLE,
    ResourceType::SERVICE_ACCOUNT,
    ResourceType::GROUP,
];

/// Resource id of a Role
pub fn role_resource_id(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Split a Role resource id into namespace and name
pub fn split_role_id(id: &str) -> Option<(&str, &str)> {
    id.split_once('/')
        .filter(|(ns, name)| !ns.is_empty() && !name.is_empty() && !name.contains('/'))
}

/// Lists Roles and grants them through RoleBindings in their namespace
pub struct RoleSyncer {
    reader: Arc<dyn ClusterReader>,
    inspector: Arc<dyn BindingInspector>,
    lookup: Arc<dyn IdentityLookup>,
    reconciler: Arc<BindingReconciler>,
}

impl RoleSyncer {
    /// Create a syncer over the shared collaborators
    pub fn new(
        reader: Arc<dyn ClusterReader>,
        inspector: Arc<dyn BindingInspector>,
        lookup: Arc<dyn IdentityLookup>,
        reconciler: Arc<BindingReconciler>,
    ) -> Self {
        Self {
            reader,
            inspector,
            lookup,
            reconciler,
        }
    }

    /// One page of Role resources across all namespaces
    pub async fn list(&self, continue_token: Option<String>) -> Result<Page<Resource>> {
        let page = self.reader.list_roles(continue_token).await?;
        let mut resources = Vec::with_capacity(page.items.len());
        for role in &page.items {
            match role_resource(role) {
                Some(resource) => resources.push(resource),
                None => warn!(name = ?role.metadata.name, "skipping Role without a name or namespace"),
            }
        }
        Ok(Page {
            items: resources,
            next_token: page.next_token,
        })
    }

    /// Membership of the role in its namespace
    pub fn entitlements(&self, resource: &Resource) -> Result<Vec<Entitlement>> {
        let (namespace, name) = resource_target(&resource.id.resource)?;
        let id = EntitlementId::assigned(
            ResourceType::ROLE.id,
            &resource.id.resource,
            EntitlementScope::Namespace(namespace.to_string()),
        );
        Ok(vec![Entitlement::new(
            resource,
            &id,
            format!("{name} Role Member"),
            format!("Grants membership to the {name} role in namespace {namespace}"),
            &GRANTABLE_TO,
        )])
    }

    /// Grants held through RoleBindings of the role
    pub async fn grants(&self, resource: &Resource) -> Result<Vec<Grant>> {
        let (namespace, name) = resource_target(&resource.id.resource)?;
        let role = RoleTarget::role(namespace, name);
        let bindings = self
            .inspector
            .matching_bindings(&role)
            .await?
            .narrow(&BindingScope::Namespace(namespace.to_string()));
        debug!(role = %role, bindings = bindings.len(), "found role bindings");
        binding_grants(
            self.lookup.as_ref(),
            &ResourceType::ROLE,
            &resource.id.resource,
            &bindings,
        )
        .await
    }

    /// Bind `principal` to the role
    pub async fn grant(&self, principal: &ResourceId, entitlement: &str) -> Result<GrantOutcome> {
        let (role, scope) = decode_target(entitlement)?;
        self.reconciler
            .grant(principal_arn(principal)?, &role, &scope)
            .await
    }

    /// Unbind `principal` from the role
    pub async fn revoke(&self, principal: &ResourceId, entitlement: &str) -> Result<RevokeOutcome> {
        let (role, scope) = decode_target(entitlement)?;
        self.reconciler
            .revoke(principal_arn(principal)?, &role, &scope)
            .await
    }
}

fn resource_target(id: &str) -> Result<(&str, &str)> {
    split_role_id(id).ok_or_else(|| {
        Error::validation_for_field("resource", format!("role id must be <namespace>/<name>: {id}"))
    })
}

fn decode_target(entitlement: &str) -> Result<(RoleTarget, BindingScope)> {
    let (resource, scope) = decode_assigned(entitlement, &ResourceType::ROLE)?;
    let (namespace, name) = split_role_id(&resource).ok_or_else(|| {
        Error::invalid_entitlement(entitlement, "role id must be <namespace>/<name>")
    })?;
    Ok((RoleTarget::role(namespace, name), BindingScope::from(&scope)))
}

fn role_resource(role: &Role) -> Option<Resource> {
    let meta = &role.metadata;
    let name = meta.name.as_deref().filter(|n| !n.is_empty())?;
    let namespace = meta.namespace.as_deref().filter(|n| !n.is_empty())?;

    let mut profile = Map::new();
    profile.insert("name".into(), Value::String(name.to_string()));
    profile.insert("namespace".into(), Value::String(namespace.to_string()));
    profile.insert(
        "uid".into(),
        Value::String(meta.uid.clone().unwrap_or_default()),
    );
    if let Some(created) = &meta.creation_timestamp {
        profile.insert("creationTimestamp".into(), serde_json::to_value(created).ok()?);
    }
    profile.insert(
        "labels".into(),
        serde_json::to_value(meta.labels.clone().unwrap_or_default()).ok()?,
    );
    profile.insert(
        "annotations".into(),
        serde_json::to_value(meta.annotations.clone().unwrap_or_default()).ok()?,
    );

    Some(Resource {
        id: ResourceId::new(&ResourceType::ROLE, role_resource_id(namespace, name)),
        display_name: name.to_string(),
        profile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_reader::MockClusterReader;
    use crate::test_support::{MockDirectory, MockInspector, MockRbac, StaticLookup};
    use eksbridge_common::RBAC_API_GROUP;
    use eksbridge_identity::ResolvedUsername;
    use eksbridge_rbac::MatchingBindings;
    use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    const ALICE: &str = "arn:aws:iam::111:user/alice";

    fn syncer(inspector: MockInspector, directory: MockDirectory, rbac: MockRbac, lookup: StaticLookup) -> RoleSyncer {
        let inspector: Arc<dyn BindingInspector> = Arc::new(inspector);
        let reconciler = Arc::new(BindingReconciler::new(
            Arc::new(directory),
            inspector.clone(),
            Arc::new(rbac),
        ));
        RoleSyncer::new(Arc::new(MockClusterReader::new()), inspector, Arc::new(lookup), reconciler)
    }

    fn deployer() -> Resource {
        role_resource(&Role {
            metadata: ObjectMeta {
                name: Some("deployer".into()),
                namespace: Some("team-a".into()),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_role_ids() {
        assert_eq!(role_resource_id("team-a", "deployer"), "team-a/deployer");
        assert_eq!(split_role_id("team-a/deployer"), Some(("team-a", "deployer")));
        assert_eq!(split_role_id("deployer"), None);
        assert_eq!(split_role_id("/deployer"), None);
        assert_eq!(split_role_id("a/b/c"), None);
    }

    /// Story: a role has a single entitlement in its own namespace
    #[test]
    fn story_role_entitlement_is_namespace_scoped() {
        let s = syncer(MockInspector::new(), MockDirectory::new(), MockRbac::new(), StaticLookup::default());
        let res = deployer();
        assert_eq!(res.id.resource, "team-a/deployer");
        let ents = s.entitlements(&res).unwrap();
        assert_eq!(ents.len(), 1);
        assert_eq!(ents[0].id, "role:team-a/deployer:assigned:team-a");
    }

    /// Story: role bindings translate to grants on the namespace entitlement
    #[tokio::test]
    async fn story_role_grants_come_from_role_bindings() {
        let mut inspector = MockInspector::new();
        inspector.expect_matching_bindings().returning(|role| {
            assert_eq!(role.namespace(), Some("team-a"));
            Ok(MatchingBindings {
                namespaced: vec![RoleBinding {
                    metadata: ObjectMeta {
                        name: Some("rb".into()),
                        namespace: Some("team-a".into()),
                        ..Default::default()
                    },
                    role_ref: RoleRef {
                        api_group: RBAC_API_GROUP.into(),
                        kind: "Role".into(),
                        name: "deployer".into(),
                    },
                    subjects: Some(vec![
                        Subject {
                            api_group: Some(RBAC_API_GROUP.into()),
                            kind: "User".into(),
                            name: "alice".into(),
                            namespace: None,
                        },
                        Subject {
                            api_group: None,
                            kind: "ServiceAccount".into(),
                            name: "deploy-bot".into(),
                            namespace: None,
                        },
                    ]),
                }],
                cluster: vec![],
            })
        });

        let s = syncer(inspector, MockDirectory::new(), MockRbac::new(), StaticLookup::default().user("alice", ALICE));
        let grants = s.grants(&deployer()).await.unwrap();
        assert_eq!(grants.len(), 2);
        assert!(grants.iter().all(|g| g.entitlement == "role:team-a/deployer:assigned:team-a"));
        assert_eq!(grants[0].principal.resource, ALICE);
        assert_eq!(grants[1].principal.resource, "team-a/deploy-bot");
    }

    /// Story: a role cannot be granted outside its namespace
    #[tokio::test]
    async fn story_cross_namespace_grant_is_rejected() {
        let mut directory = MockDirectory::new();
        directory.expect_resolve_or_create_username().never();
        let s = syncer(MockInspector::new(), directory, MockRbac::new(), StaticLookup::default());
        let alice = ResourceId::new(&ResourceType::IAM_USER, ALICE);

        let err = s.grant(&alice, "role:team-a/deployer:assigned:team-b").await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        let err = s.grant(&alice, "role:team-a/deployer:assigned:cluster").await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        let err = s.grant(&alice, "role:deployer:assigned:team-a").await.unwrap_err();
        assert!(matches!(err, Error::InvalidEntitlement { .. }));
    }

    #[tokio::test]
    async fn test_grant_in_own_namespace() {
        let mut directory = MockDirectory::new();
        directory.expect_resolve_or_create_username().returning(|_| {
            Ok(ResolvedUsername {
                username: "alice".into(),
                created: false,
            })
        });
        let mut inspector = MockInspector::new();
        inspector
            .expect_matching_bindings()
            .returning(|_| Ok(MatchingBindings::default()));
        let mut rbac = MockRbac::new();
        rbac.expect_create_role_binding()
            .withf(|rb| {
                rb.metadata.name.as_deref() == Some("eksbridge-role-deployer-team-a-binding")
                    && rb.role_ref.kind == "Role"
            })
            .times(1)
            .returning(|_| Ok(()));

        let s = syncer(inspector, directory, rbac, StaticLookup::default());
        let outcome = s
            .grant(
                &ResourceId::new(&ResourceType::IAM_USER, ALICE),
                "role:team-a/deployer:assigned:team-a",
            )
            .await
            .unwrap();
        assert_eq!(outcome, GrantOutcome::Applied);
    }
}
