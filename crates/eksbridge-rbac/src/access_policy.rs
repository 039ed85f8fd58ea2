//! EKS access policy associations with cluster/namespace scope merging
//!
//! A principal holds at most one association per policy, scoped either to
//! the whole cluster or to a list of namespaces. Granting or revoking one
//! namespace therefore rewrites the namespace list, and a cluster-scoped
//! association can never be narrowed by a namespace request.

use std::sync::Arc;

use async_trait::async_trait;
use eksbridge_common::{arn, EntitlementScope, Error, GrantOutcome, Page, RevokeOutcome};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Result;

/// Scope of an access policy association
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessScope {
    /// Whole cluster
    Cluster,
    /// Listed namespaces only
    Namespace(Vec<String>),
}

/// Scope named by a grant or revoke request
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RequestedScope {
    /// Whole cluster
    Cluster,
    /// One namespace
    Namespace(String),
}

impl From<&EntitlementScope> for RequestedScope {
    fn from(scope: &EntitlementScope) -> Self {
        match scope {
            EntitlementScope::Cluster => RequestedScope::Cluster,
            EntitlementScope::Namespace(ns) => RequestedScope::Namespace(ns.clone()),
        }
    }
}

/// An access policy associated with a principal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedPolicy {
    /// Access policy ARN
    pub policy_arn: String,
    /// Association scope
    pub scope: AccessScope,
}

/// Access entries and policy associations of the EKS control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccessPolicyRegistry: Send + Sync {
    /// Create the principal's access entry; `Error::AlreadyExists` if present
    async fn create_access_entry(&self, principal: &str) -> Result<()>;

    /// Policies associated with the principal; `Error::NotFound` without an access entry
    async fn associated_policies(&self, principal: &str) -> Result<Vec<AssociatedPolicy>>;

    /// Associate a policy, replacing any existing scope
    async fn associate_policy(&self, principal: &str, policy: &str, scope: &AccessScope) -> Result<()>;

    /// Remove the association of a policy
    async fn disassociate_policy(&self, principal: &str, policy: &str) -> Result<()>;

    /// One page of principals holding the policy
    async fn list_principals_with_policy(
        &self,
        policy: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>>;
}

/// Grants and revokes access policies while keeping scopes consistent
pub struct AccessPolicyReconciler {
    registry: Arc<dyn AccessPolicyRegistry>,
}

impl AccessPolicyReconciler {
    /// Create a reconciler over the given registry
    pub fn new(registry: Arc<dyn AccessPolicyRegistry>) -> Self {
        Self { registry }
    }

    /// Current scope of the principal's association with `policy`
    ///
    /// A principal without an access entry holds no association.
    pub async fn policy_scope(&self, principal: &str, policy: &str) -> Result<Option<AccessScope>> {
        let policies = match self.registry.associated_policies(principal).await {
            Ok(policies) => policies,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(policies
            .into_iter()
            .find(|p| p.policy_arn == policy)
            .map(|p| p.scope))
    }

    /// One page of principals holding `policy`
    pub async fn principals_with_policy(
        &self,
        policy: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>> {
        self.registry.list_principals_with_policy(policy, next_token).await
    }

    /// Make sure `principal` holds `policy` at `requested` scope
    pub async fn grant(
        &self,
        principal: &str,
        policy: &str,
        requested: &RequestedScope,
    ) -> Result<GrantOutcome> {
        if !arn::is_user_or_role(principal) {
            return Err(Error::validation_for_field(
                "principal",
                format!("{principal} is not an IAM user or role"),
            ));
        }

        match self.registry.create_access_entry(principal).await {
            Ok(()) => info!(principal = %principal, "created access entry"),
            Err(e) if e.is_already_exists() => {
                debug!(principal = %principal, "access entry already exists")
            }
            Err(e) => return Err(e),
        }

        let existing = self.policy_scope(principal, policy).await?;
        let target = match (existing, requested) {
            (None, RequestedScope::Cluster) => AccessScope::Cluster,
            (None, RequestedScope::Namespace(ns)) => AccessScope::Namespace(vec![ns.clone()]),
            (Some(AccessScope::Cluster), RequestedScope::Namespace(ns)) => {
                return Err(Error::scope_conflict(
                    principal,
                    policy,
                    format!("cannot grant namespace {ns}: policy is already associated at cluster scope"),
                ));
            }
            (Some(AccessScope::Namespace(namespaces)), RequestedScope::Namespace(ns)) => {
                if namespaces.contains(ns) {
                    debug!(principal = %principal, policy = %policy, namespace = %ns, "namespace already associated");
                    return Ok(GrantOutcome::AlreadySatisfied);
                }
                let mut merged = namespaces;
                merged.push(ns.clone());
                AccessScope::Namespace(merged)
            }
            // cluster scope supersedes whatever namespaces were held
            (Some(_), RequestedScope::Cluster) => AccessScope::Cluster,
        };

        self.registry.associate_policy(principal, policy, &target).await?;
        info!(principal = %principal, policy = %policy, scope = ?target, "associated access policy");
        Ok(GrantOutcome::Applied)
    }

    /// Make sure `principal` no longer holds `policy` at `requested` scope
    pub async fn revoke(
        &self,
        principal: &str,
        policy: &str,
        requested: &RequestedScope,
    ) -> Result<RevokeOutcome> {
        let Some(existing) = self.policy_scope(principal, policy).await? else {
            debug!(principal = %principal, policy = %policy, "policy not associated");
            return Ok(RevokeOutcome::AlreadyRevoked);
        };

        match (existing, requested) {
            (AccessScope::Cluster, RequestedScope::Namespace(ns)) => Err(Error::scope_conflict(
                principal,
                policy,
                format!("cannot revoke namespace {ns}: policy is associated at cluster scope"),
            )),
            (AccessScope::Cluster, RequestedScope::Cluster) => self.disassociate(principal, policy).await,
            (AccessScope::Namespace(_), RequestedScope::Cluster) => {
                // no cluster association to remove, and the namespaces are not widened
                debug!(principal = %principal, policy = %policy, "policy only associated at namespace scope");
                Ok(RevokeOutcome::AlreadyRevoked)
            }
            (AccessScope::Namespace(namespaces), RequestedScope::Namespace(ns)) => {
                if !namespaces.contains(ns) {
                    return Ok(RevokeOutcome::AlreadyRevoked);
                }
                let remaining: Vec<String> = namespaces.into_iter().filter(|n| n != ns).collect();
                if remaining.is_empty() {
                    return self.disassociate(principal, policy).await;
                }
                let scope = AccessScope::Namespace(remaining);
                self.registry.associate_policy(principal, policy, &scope).await?;
                info!(principal = %principal, policy = %policy, scope = ?scope, "narrowed access policy association");
                Ok(RevokeOutcome::Applied)
            }
        }
    }

    async fn disassociate(&self, principal: &str, policy: &str) -> Result<RevokeOutcome> {
        match self.registry.disassociate_policy(principal, policy).await {
            Ok(()) => {
                info!(principal = %principal, policy = %policy, "disassociated access policy");
                Ok(RevokeOutcome::Applied)
            }
            Err(e) if e.is_not_found() => {
                debug!(principal = %principal, policy = %policy, "association already gone");
                Ok(RevokeOutcome::Applied)
            }
            Err(e) => Err(e),
        }
    }
}
