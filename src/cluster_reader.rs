//! Paginated reads of cluster roles, roles and namespaces

use async_trait::async_trait;
use eksbridge_common::{next_token, Error};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{ClusterRole, Role};
use kube::api::{ListParams, ObjectList};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

use crate::resource::Page;
use crate::Result;

/// Objects requested per list call
pub const LIST_PAGE_SIZE: u32 = 100;

/// Read access to the cluster objects the syncers list
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// One page of ClusterRoles
    async fn list_cluster_roles(&self, continue_token: Option<String>) -> Result<Page<ClusterRole>>;

    /// One page of Roles across every namespace
    async fn list_roles(&self, continue_token: Option<String>) -> Result<Page<Role>>;

    /// One page of Namespaces
    async fn list_namespaces(&self, continue_token: Option<String>) -> Result<Page<Namespace>>;
}

/// `ClusterReader` backed by the Kubernetes API
pub struct KubeClusterReader {
    client: Client,
}

impl KubeClusterReader {
    /// Create a reader using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn list_params(continue_token: Option<&str>) -> ListParams {
    let lp = ListParams::default().limit(LIST_PAGE_SIZE);
    match continue_token {
        Some(token) => lp.continue_token(token),
        None => lp,
    }
}

async fn list_page<K>(api: Api<K>, kind: &str, continue_token: Option<String>) -> Result<Page<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    let list: ObjectList<K> = api
        .list(&list_params(continue_token.as_deref()))
        .await
        .map_err(|e| Error::kube(format!("list {kind}"), e))?;
    Ok(Page {
        items: list.items,
        next_token: next_token(list.metadata.continue_),
    })
}

#[async_trait]
impl ClusterReader for KubeClusterReader {
    async fn list_cluster_roles(&self, continue_token: Option<String>) -> Result<Page<ClusterRole>> {
        list_page(Api::all(self.client.clone()), "ClusterRoles", continue_token).await
    }

    async fn list_roles(&self, continue_token: Option<String>) -> Result<Page<Role>> {
        list_page(Api::all(self.client.clone()), "Roles", continue_token).await
    }

    async fn list_namespaces(&self, continue_token: Option<String>) -> Result<Page<Namespace>> {
        list_page(Api::all(self.client.clone()), "Namespaces", continue_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_params_carry_limit_and_token() {
        let lp = list_params(None);
        assert_eq!(lp.limit, Some(LIST_PAGE_SIZE));
        assert!(lp.continue_token.is_none());

        let lp = list_params(Some("abc"));
        assert_eq!(lp.continue_token.as_deref(), Some("abc"));
    }
}
