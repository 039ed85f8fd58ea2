//! Lookup of the bindings that point at a role

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
#[cfg(test)]
use mockall::automock;

use crate::binding::{Binding, BindingScope, RoleTarget};
use crate::Result;

/// Bindings whose `roleRef` matches a role
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchingBindings {
    /// RoleBindings, across every namespace searched
    pub namespaced: Vec<RoleBinding>,
    /// ClusterRoleBindings
    pub cluster: Vec<ClusterRoleBinding>,
}

impl MatchingBindings {
    /// Keep only the bindings that grant at `scope`
    ///
    /// Cluster scope keeps ClusterRoleBindings; a namespace scope keeps the
    /// RoleBindings of that namespace.
    pub fn narrow(self, scope: &BindingScope) -> Vec<Binding> {
        match scope {
            BindingScope::Cluster => self.cluster.into_iter().map(Binding::Cluster).collect(),
            BindingScope::Namespace(ns) => self
                .namespaced
                .into_iter()
                .filter(|rb| rb.metadata.namespace.as_deref() == Some(ns.as_str()))
                .map(Binding::Namespaced)
                .collect(),
        }
    }

    /// Every binding, ClusterRoleBindings first
    pub fn into_bindings(self) -> Vec<Binding> {
        self.cluster
            .into_iter()
            .map(Binding::Cluster)
            .chain(self.namespaced.into_iter().map(Binding::Namespaced))
            .collect()
    }

    /// True if nothing points at the role
    pub fn is_empty(&self) -> bool {
        self.namespaced.is_empty() && self.cluster.is_empty()
    }
}

/// Finds the bindings of a role
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BindingInspector: Send + Sync {
    /// RoleBindings and ClusterRoleBindings whose `roleRef` points at `role`
    ///
    /// For a `Role` target only RoleBindings in the role's namespace can
    /// match, and `cluster` is always empty.
    async fn matching_bindings(&self, role: &RoleTarget) -> Result<MatchingBindings>;
}
