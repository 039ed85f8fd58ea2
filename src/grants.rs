//! Translation of RBAC binding subjects into principal grants

use eksbridge_common::arn::{self, PrincipalKind};
use eksbridge_common::{EntitlementId, EntitlementScope, RBAC_API_GROUP};
use eksbridge_identity::IdentityLookup;
use eksbridge_rbac::Binding;
use k8s_openapi::api::rbac::v1::Subject;
use tracing::{debug, warn};

use crate::resource::{Grant, ResourceId, ResourceType};
use crate::Result;

const SERVICE_ACCOUNT_KIND: &str = "ServiceAccount";
const USER_KIND: &str = "User";
const GROUP_KIND: &str = "Group";
const RBAC_API_GROUP_V1: &str = "rbac.authorization.k8s.io/v1";
const SYSTEM_PREFIX: &str = "system:";

/// Grant on `entitlement` for an IAM principal
///
/// Roles become `iam_role` grants that also expand to everyone who can
/// assume the role. Principals that are neither users nor roles yield `None`.
pub fn principal_grant(entitlement: &EntitlementId, principal: &str) -> Option<Grant> {
    match arn::classify(principal) {
        PrincipalKind::Role => {
            let trust = EntitlementId::assumes(ResourceType::IAM_ROLE.id, principal);
            Some(
                Grant::new(entitlement, ResourceId::new(&ResourceType::IAM_ROLE, principal))
                    .expandable_by(&trust),
            )
        }
        PrincipalKind::User => Some(Grant::new(
            entitlement,
            ResourceId::new(&ResourceType::IAM_USER, principal),
        )),
        PrincipalKind::Unsupported => None,
    }
}

fn in_rbac_group(subject: &Subject) -> bool {
    matches!(
        subject.api_group.as_deref(),
        Some(RBAC_API_GROUP) | Some(RBAC_API_GROUP_V1)
    )
}

/// Grants held through `bindings` of the resource `kind`/`resource`
///
/// ClusterRoleBindings grant `assigned:cluster`, RoleBindings grant
/// `assigned:<namespace>`. Service accounts are reported as-is; users and
/// groups are mapped back to IAM principals through `lookup`. Built-in
/// `system:` identities are skipped.
pub async fn binding_grants(
    lookup: &dyn IdentityLookup,
    kind: &ResourceType,
    resource: &str,
    bindings: &[Binding],
) -> Result<Vec<Grant>> {
    let mut grants = Vec::new();
    for binding in bindings {
        let scope = match binding {
            Binding::Cluster(_) => EntitlementScope::Cluster,
            Binding::Namespaced(_) => match binding.namespace() {
                Some(ns) => EntitlementScope::Namespace(ns.to_string()),
                None => {
                    warn!(binding = %binding.describe(), "skipping RoleBinding without a namespace");
                    continue;
                }
            },
        };
        let entitlement = EntitlementId::assigned(kind.id, resource, scope);

        for subject in binding.subjects() {
            if subject.kind == SERVICE_ACCOUNT_KIND {
                let namespace = subject
                    .namespace
                    .as_deref()
                    .or(binding.namespace())
                    .unwrap_or_default();
                let id = format!("{namespace}/{}", subject.name);
                grants.push(Grant::new(
                    &entitlement,
                    ResourceId::new(&ResourceType::SERVICE_ACCOUNT, id),
                ));
                continue;
            }
            if !in_rbac_group(subject) || subject.name.contains(SYSTEM_PREFIX) {
                continue;
            }

            let principals = match subject.kind.as_str() {
                USER_KIND => lookup.lookup_by_username(&subject.name).await?,
                GROUP_KIND => lookup.lookup_by_group(&subject.name).await?,
                _ => continue,
            };
            for principal in principals {
                match principal_grant(&entitlement, &principal) {
                    Some(grant) => grants.push(grant),
                    None => debug!(principal = %principal, "ignoring mapped principal that is not a user or role"),
                }
            }
        }
    }
    Ok(grants)
}
