//! Shared fakes and mocks for unit tests

use std::collections::BTreeMap;

use async_trait::async_trait;
use eksbridge_common::Page;
use eksbridge_identity::{IdentityLookup, ResolvedUsername, UsernameDirectory};
use eksbridge_rbac::{
    AccessPolicyRegistry, AccessScope, AssociatedPolicy, BindingInspector, MatchingBindings,
    RbacClient, RoleTarget,
};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use mockall::mock;

use crate::Result;

mock! {
    pub Directory {}

    #[async_trait]
    impl UsernameDirectory for Directory {
        async fn resolve_username(&self, principal: &str) -> Result<Option<String>>;
        async fn resolve_or_create_username(&self, principal: &str) -> Result<ResolvedUsername>;
    }
}

mock! {
    pub Inspector {}

    #[async_trait]
    impl BindingInspector for Inspector {
        async fn matching_bindings(&self, role: &RoleTarget) -> Result<MatchingBindings>;
    }
}

mock! {
    pub Rbac {}

    #[async_trait]
    impl RbacClient for Rbac {
        async fn create_role_binding(&self, binding: &RoleBinding) -> Result<()>;
        async fn update_role_binding(&self, binding: &RoleBinding) -> Result<()>;
        async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<()>;
        async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<()>;
        async fn update_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<()>;
        async fn delete_cluster_role_binding(&self, name: &str) -> Result<()>;
    }
}

mock! {
    pub PolicyRegistry {}

    #[async_trait]
    impl AccessPolicyRegistry for PolicyRegistry {
        async fn create_access_entry(&self, principal: &str) -> Result<()>;
        async fn associated_policies(&self, principal: &str) -> Result<Vec<AssociatedPolicy>>;
        async fn associate_policy(&self, principal: &str, policy: &str, scope: &AccessScope) -> Result<()>;
        async fn disassociate_policy(&self, principal: &str, policy: &str) -> Result<()>;
        async fn list_principals_with_policy(
            &self,
            policy: &str,
            next_token: Option<String>,
        ) -> Result<Page<String>>;
    }
}

/// Fixed username and group mappings
#[derive(Default)]
pub struct StaticLookup {
    pub users: BTreeMap<String, Vec<String>>,
    pub groups: BTreeMap<String, Vec<String>>,
}

impl StaticLookup {
    pub fn user(mut self, username: &str, principal: &str) -> Self {
        self.users
            .entry(username.to_string())
            .or_default()
            .push(principal.to_string());
        self
    }

    pub fn group(mut self, group: &str, principal: &str) -> Self {
        self.groups
            .entry(group.to_string())
            .or_default()
            .push(principal.to_string());
        self
    }
}

#[async_trait]
impl IdentityLookup for StaticLookup {
    async fn lookup_by_username(&self, username: &str) -> Result<Vec<String>> {
        Ok(self.users.get(username).cloned().unwrap_or_default())
    }

    async fn lookup_by_group(&self, group: &str) -> Result<Vec<String>> {
        Ok(self.groups.get(group).cloned().unwrap_or_default())
    }
}
