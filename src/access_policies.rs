//! EKS access policies as resources, provisioned through policy associations

use std::sync::Arc;

use eksbridge_common::{EntitlementId, EntitlementScope, GrantOutcome, RevokeOutcome};
use eksbridge_rbac::{AccessPolicyReconciler, AccessScope, RequestedScope};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cluster_reader::ClusterReader;
use crate::grants::principal_grant;
use crate::resource::{
    decode_assigned, principal_arn, Entitlement, Grant, Page, Resource, ResourceId, ResourceType,
};
use crate::Result;

const GRANTABLE_TO: [ResourceType; 2] = [ResourceType::IAM_USER, ResourceType::IAM_ROLE];

/// An AWS-managed EKS access policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StandardPolicy {
    /// Policy ARN
    pub arn: &'static str,
    /// Policy name
    pub name: &'static str,
    /// What the policy allows
    pub description: &'static str,
}

/// The access policies offered for every cluster
pub const STANDARD_POLICIES: [StandardPolicy; 5] = [
    StandardPolicy {
        arn: "arn:aws:eks::aws:cluster-access-policy/AmazonEKSClusterAdminPolicy",
        name: "AmazonEKSClusterAdminPolicy",
        description: "This access policy includes permissions that grant an IAM principal administrator access to a cluster. \
            When associated to an access entry, its access scope is typically the cluster, rather than a Kubernetes namespace. \
            If you want an IAM principal to have a more limited administrative scope, consider associating the AmazonEKSAdminPolicy access policy to your access entry instead.",
    },
    StandardPolicy {
        arn: "arn:aws:eks::aws:cluster-access-policy/AmazonEKSAdminPolicy",
        name: "AmazonEKSAdminPolicy",
        description: "This access policy includes permissions that grant an IAM principal most permissions to resources. \
            When associated to an access entry, its access scope is typically one or more Kubernetes namespaces. \
            If you want an IAM principal to have administrator access to all resources on your cluster, associate the AmazonEKSClusterAdminPolicy access policy to your access entry instead.",
    },
    StandardPolicy {
        arn: "arn:aws:eks::aws:cluster-access-policy/AmazonEKSViewPolicy",
        name: "AmazonEKSViewPolicy",
        description: "This access policy includes permissions that allow an IAM principal to view most Kubernetes resources.",
    },
    StandardPolicy {
        arn: "arn:aws:eks::aws:cluster-access-policy/AmazonEKSEditPolicy",
        name: "AmazonEKSEditPolicy",
        description: "This access policy includes permissions that allow an IAM principal to edit most Kubernetes resources.",
    },
    StandardPolicy {
        arn: "arn:aws:eks::aws:cluster-access-policy/AmazonEKSAdminViewPolicy",
        name: "AmazonEKSAdminViewPolicy",
        description: "This access policy includes permissions that grant an IAM principal access to list/view all resources in a cluster. \
            Note this includes Kubernetes Secrets.",
    },
];

/// Lists the standard access policies and who holds them
pub struct AccessPolicySyncer {
    reader: Arc<dyn ClusterReader>,
    reconciler: Arc<AccessPolicyReconciler>,
}

impl AccessPolicySyncer {
    /// Create a syncer over the shared collaborators
    pub fn new(reader: Arc<dyn ClusterReader>, reconciler: Arc<AccessPolicyReconciler>) -> Self {
        Self { reader, reconciler }
    }

    /// The standard access policies
    pub fn list(&self) -> Vec<Resource> {
        STANDARD_POLICIES.iter().map(policy_resource).collect()
    }

    /// One page of entitlements: a namespace entitlement per namespace on
    /// the page, and the cluster entitlement after the last page
    pub async fn entitlements(
        &self,
        resource: &Resource,
        continue_token: Option<String>,
    ) -> Result<Page<Entitlement>> {
        let name = &resource.display_name;
        let page = self.reader.list_namespaces(continue_token).await?;

        let mut entitlements: Vec<Entitlement> = page
            .items
            .iter()
            .filter_map(|ns| ns.metadata.name.as_deref())
            .map(|ns| {
                Entitlement::new(
                    resource,
                    &EntitlementId::assigned(
                        ResourceType::ACCESS_POLICY.id,
                        &resource.id.resource,
                        EntitlementScope::Namespace(ns.to_string()),
                    ),
                    format!("{name} Access policy scoped to {ns} namespace"),
                    format!("Grants assignment to the {name} Access policy in {ns} namespace"),
                    &GRANTABLE_TO,
                )
            })
            .collect();

        if page.next_token.is_none() {
            entitlements.push(Entitlement::new(
                resource,
                &EntitlementId::assigned(
                    ResourceType::ACCESS_POLICY.id,
                    &resource.id.resource,
                    EntitlementScope::Cluster,
                ),
                format!("{name} Access policy cluster scoped"),
                format!("Grants assignment to the {name} Access policy for cluster"),
                &GRANTABLE_TO,
            ));
        }
        Ok(Page {
            items: entitlements,
            next_token: page.next_token,
        })
    }

    /// One page of grants: principals holding the policy, one grant per
    /// namespace of their association or one cluster grant
    ///
    /// A principal whose association cannot be read is skipped.
    pub async fn grants(&self, resource: &Resource, next_token: Option<String>) -> Result<Page<Grant>> {
        let policy = resource.id.resource.as_str();
        let page = self.reconciler.principals_with_policy(policy, next_token).await?;

        let mut grants = Vec::new();
        for principal in &page.items {
            let scope = match self.reconciler.policy_scope(principal, policy).await {
                Ok(Some(scope)) => scope,
                Ok(None) => continue,
                Err(e) => {
                    warn!(principal = %principal, policy = %policy, error = %e, "failed to read policy scope, skipping principal");
                    continue;
                }
            };
            let scopes = match scope {
                AccessScope::Cluster => vec![EntitlementScope::Cluster],
                AccessScope::Namespace(namespaces) => namespaces
                    .into_iter()
                    .map(EntitlementScope::Namespace)
                    .collect(),
            };
            let before = grants.len();
            for scope in scopes {
                let entitlement = EntitlementId::assigned(ResourceType::ACCESS_POLICY.id, policy, scope);
                match principal_grant(&entitlement, principal) {
                    Some(grant) => grants.push(grant),
                    None => {
                        debug!(principal = %principal, "ignoring principal that is not a user or role");
                        break;
                    }
                }
            }
            debug!(principal = %principal, policy = %policy, grants = grants.len() - before, "read policy grants");
        }
        Ok(Page {
            items: grants,
            next_token: page.next_token,
        })
    }

    /// Associate the policy with `principal` at the entitlement's scope
    pub async fn grant(&self, principal: &ResourceId, entitlement: &str) -> Result<GrantOutcome> {
        let (policy, scope) = decode_assigned(entitlement, &ResourceType::ACCESS_POLICY)?;
        self.reconciler
            .grant(principal_arn(principal)?, &policy, &RequestedScope::from(&scope))
            .await
    }

    /// Remove the entitlement's scope from `principal`'s association
    pub async fn revoke(&self, principal: &ResourceId, entitlement: &str) -> Result<RevokeOutcome> {
        let (policy, scope) = decode_assigned(entitlement, &ResourceType::ACCESS_POLICY)?;
        self.reconciler
            .revoke(principal_arn(principal)?, &policy, &RequestedScope::from(&scope))
            .await
    }
}

fn policy_resource(policy: &StandardPolicy) -> Resource {
    let mut profile = Map::new();
    profile.insert("display_name".into(), Value::String(policy.name.into()));
    profile.insert("policy_arn".into(), Value::String(policy.arn.into()));
    profile.insert("description".into(), Value::String(policy.description.into()));
    Resource {
        id: ResourceId::new(&ResourceType::ACCESS_POLICY, policy.arn),
        display_name: policy.name.to_string(),
        profile,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_reader::MockClusterReader;
    use crate::test_support::MockPolicyRegistry;
    use eksbridge_common::Error;
    use eksbridge_rbac::AssociatedPolicy;
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::predicate::eq;

    const VIEW: &str = "arn:aws:eks::aws:cluster-access-policy/AmazonEKSViewPolicy";
    const ALICE: &str = "arn:aws:iam::111:user/alice";
    const READERS: &str = "arn:aws:iam::111:role/readers";

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn syncer(reader: MockClusterReader, registry: MockPolicyRegistry) -> AccessPolicySyncer {
        AccessPolicySyncer::new(
            Arc::new(reader),
            Arc::new(AccessPolicyReconciler::new(Arc::new(registry))),
        )
    }

    fn view() -> Resource {
        policy_resource(&STANDARD_POLICIES[2])
    }

    #[test]
    fn test_standard_policies_are_listed() {
        let s = syncer(MockClusterReader::new(), MockPolicyRegistry::new());
        let policies = s.list();
        assert_eq!(policies.len(), 5);
        assert!(policies
            .iter()
            .all(|p| p.id.resource.starts_with("arn:aws:eks::aws:cluster-access-policy/AmazonEKS")));
        assert_eq!(policies[2].display_name, "AmazonEKSViewPolicy");
        assert_eq!(policies[2].profile["policy_arn"], VIEW);
    }

    /// Story: the cluster entitlement only appears on the last namespace page
    #[tokio::test]
    async fn story_cluster_entitlement_follows_the_last_page() {
        let mut reader = MockClusterReader::new();
        reader
            .expect_list_namespaces()
            .with(eq(None::<String>))
            .returning(|_| Ok(Page::with_next(vec![namespace("default")], "p2")));
        reader
            .expect_list_namespaces()
            .with(eq(Some("p2".to_string())))
            .returning(|_| Ok(Page::last(vec![namespace("team-a")])));
        let s = syncer(reader, MockPolicyRegistry::new());

        let first = s.entitlements(&view(), None).await.unwrap();
        assert_eq!(first.next_token.as_deref(), Some("p2"));
        assert_eq!(first.items.len(), 1);
        assert_eq!(first.items[0].id, format!("access_policy:{VIEW}:assigned:default"));
        assert_eq!(
            first.items[0].display_name,
            "AmazonEKSViewPolicy Access policy scoped to default namespace"
        );

        let last = s.entitlements(&view(), first.next_token).await.unwrap();
        assert!(last.next_token.is_none());
        let ids: Vec<String> = last.items.iter().map(|e| e.id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                format!("access_policy:{VIEW}:assigned:team-a"),
                format!("access_policy:{VIEW}:assigned:cluster"),
            ]
        );
    }

    /// Story: associations become one grant per namespace or one cluster grant
    #[tokio::test]
    async fn story_grants_follow_association_scopes() {
        let mut registry = MockPolicyRegistry::new();
        registry
            .expect_list_principals_with_policy()
            .with(eq(VIEW), eq(None::<String>))
            .returning(|_, _| {
                Ok(Page::with_next(
                    vec![
                        ALICE.to_string(),
                        READERS.to_string(),
                        "arn:aws:iam::111:user/broken".to_string(),
                    ],
                    "n2",
                ))
            });
        registry
            .expect_associated_policies()
            .with(eq(ALICE))
            .returning(|_| {
                Ok(vec![AssociatedPolicy {
                    policy_arn: VIEW.into(),
                    scope: AccessScope::Namespace(vec!["default".into(), "team-a".into()]),
                }])
            });
        registry
            .expect_associated_policies()
            .with(eq(READERS))
            .returning(|_| {
                Ok(vec![AssociatedPolicy {
                    policy_arn: VIEW.into(),
                    scope: AccessScope::Cluster,
                }])
            });
        registry
            .expect_associated_policies()
            .with(eq("arn:aws:iam::111:user/broken"))
            .returning(|_| Err(Error::upstream("list associated policies", "throttled")));

        let s = syncer(MockClusterReader::new(), registry);
        let page = s.grants(&view(), None).await.unwrap();
        assert_eq!(page.next_token.as_deref(), Some("n2"));
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.items[0].entitlement, format!("access_policy:{VIEW}:assigned:default"));
        assert_eq!(page.items[1].entitlement, format!("access_policy:{VIEW}:assigned:team-a"));
        assert_eq!(page.items[2].entitlement, format!("access_policy:{VIEW}:assigned:cluster"));
        assert_eq!(page.items[2].principal.resource_type, "iam_role");
        assert_eq!(
            page.items[2].expandable,
            vec![format!("iam_role:{READERS}:assumes")]
        );
    }

    /// Story: a namespace grant over an existing cluster association conflicts
    #[tokio::test]
    async fn story_grant_routes_through_scope_merger() {
        let mut registry = MockPolicyRegistry::new();
        registry
            .expect_create_access_entry()
            .returning(|p| Err(Error::already_exists(p)));
        registry.expect_associated_policies().returning(|_| {
            Ok(vec![AssociatedPolicy {
                policy_arn: VIEW.into(),
                scope: AccessScope::Cluster,
            }])
        });
        registry.expect_associate_policy().never();

        let s = syncer(MockClusterReader::new(), registry);
        let err = s
            .grant(
                &ResourceId::new(&ResourceType::IAM_USER, ALICE),
                &format!("access_policy:{VIEW}:assigned:default"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ScopeConflict { .. }));
    }

    #[tokio::test]
    async fn test_revoke_cluster_scope_disassociates() {
        let mut registry = MockPolicyRegistry::new();
        registry.expect_associated_policies().returning(|_| {
            Ok(vec![AssociatedPolicy {
                policy_arn: VIEW.into(),
                scope: AccessScope::Cluster,
            }])
        });
        registry
            .expect_disassociate_policy()
            .with(eq(READERS), eq(VIEW))
            .times(1)
            .returning(|_, _| Ok(()));

        let s = syncer(MockClusterReader::new(), registry);
        let outcome = s
            .revoke(
                &ResourceId::new(&ResourceType::IAM_ROLE, READERS),
                &format!("access_policy:{VIEW}:assigned:cluster"),
            )
            .await
            .unwrap();
        assert_eq!(outcome, RevokeOutcome::Applied);
    }
}
