//! RBAC writes and binding lookups against the Kubernetes API

use async_trait::async_trait;
use eksbridge_common::Error;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::binding::{RoleKind, RoleTarget};
use crate::inspector::{BindingInspector, MatchingBindings};
use crate::Result;

/// Writes to RoleBindings and ClusterRoleBindings
///
/// Updates send the resourceVersion of the object passed in, so a binding
/// that changed since it was read fails with a retryable conflict.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RbacClient: Send + Sync {
    /// Create a RoleBinding
    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<()>;

    /// Replace a RoleBinding
    async fn update_role_binding(&self, binding: &RoleBinding) -> Result<()>;

    /// Delete a RoleBinding
    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create a ClusterRoleBinding
    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<()>;

    /// Replace a ClusterRoleBinding
    async fn update_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<()>;

    /// Delete a ClusterRoleBinding
    async fn delete_cluster_role_binding(&self, name: &str) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct KubeRbacClient {
    client: Client,
}

impl KubeRbacClient {
    /// Create a new KubeRbacClient wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn role_bindings(&self, namespace: &str) -> Api<RoleBinding> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn cluster_role_bindings(&self) -> Api<ClusterRoleBinding> {
        Api::all(self.client.clone())
    }
}

fn binding_namespace(binding: &RoleBinding) -> Result<&str> {
    binding
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::validation_for_field("metadata.namespace", "RoleBinding has no namespace"))
}

fn binding_name(meta_name: Option<&str>) -> Result<&str> {
    meta_name.ok_or_else(|| Error::validation_for_field("metadata.name", "binding has no name"))
}

#[async_trait]
impl RbacClient for KubeRbacClient {
    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<()> {
        let namespace = binding_namespace(binding)?;
        let name = binding_name(binding.metadata.name.as_deref())?;
        self.role_bindings(namespace)
            .create(&PostParams::default(), binding)
            .await
            .map_err(|e| Error::kube(format!("create RoleBinding {namespace}/{name}"), e))?;
        Ok(())
    }

    async fn update_role_binding(&self, binding: &RoleBinding) -> Result<()> {
        let namespace = binding_namespace(binding)?;
        let name = binding_name(binding.metadata.name.as_deref())?;
        self.role_bindings(namespace)
            .replace(name, &PostParams::default(), binding)
            .await
            .map_err(|e| Error::kube(format!("update RoleBinding {namespace}/{name}"), e))?;
        Ok(())
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<()> {
        self.role_bindings(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::kube(format!("delete RoleBinding {namespace}/{name}"), e))?;
        Ok(())
    }

    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<()> {
        let name = binding_name(binding.metadata.name.as_deref())?;
        self.cluster_role_bindings()
            .create(&PostParams::default(), binding)
            .await
            .map_err(|e| Error::kube(format!("create ClusterRoleBinding {name}"), e))?;
        Ok(())
    }

    async fn update_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<()> {
        let name = binding_name(binding.metadata.name.as_deref())?;
        self.cluster_role_bindings()
            .replace(name, &PostParams::default(), binding)
            .await
            .map_err(|e| Error::kube(format!("update ClusterRoleBinding {name}"), e))?;
        Ok(())
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<()> {
        self.cluster_role_bindings()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::kube(format!("delete ClusterRoleBinding {name}"), e))?;
        Ok(())
    }
}

#[async_trait]
impl BindingInspector for KubeRbacClient {
    async fn matching_bindings(&self, role: &RoleTarget) -> Result<MatchingBindings> {
        let role_bindings: Api<RoleBinding> = match &role.kind {
            RoleKind::ClusterRole => Api::all(self.client.clone()),
            RoleKind::Role { namespace } => self.role_bindings(namespace),
        };
        let namespaced = role_bindings
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::kube("list RoleBindings", e))?
            .items
            .into_iter()
            .filter(|rb| role.matches(&rb.role_ref))
            .collect::<Vec<_>>();

        let cluster = match role.kind {
            RoleKind::ClusterRole => self
                .cluster_role_bindings()
                .list(&ListParams::default())
                .await
                .map_err(|e| Error::kube("list ClusterRoleBindings", e))?
                .items
                .into_iter()
                .filter(|crb| role.matches(&crb.role_ref))
                .collect(),
            RoleKind::Role { .. } => Vec::new(),
        };

        debug!(
            role = %role,
            role_bindings = namespaced.len(),
            cluster_role_bindings = cluster.len(),
            "found matching bindings"
        );
        Ok(MatchingBindings { namespaced, cluster })
    }
}
