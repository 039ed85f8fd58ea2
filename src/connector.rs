//! Connector wiring: one instance per EKS cluster
//!
//! `Connector` owns the shared identity cache and reconcilers and hands
//! them to the four resource syncers. Grant and revoke requests are routed
//! by the resource type encoded in the entitlement id and run under the
//! configured request deadline.

use std::future::Future;
use std::sync::Arc;

use eksbridge_common::{EntitlementId, Error, GrantOutcome, RevokeOutcome};
use eksbridge_identity::{
    AccessEntryRegistry, AccessEntrySource, AuthConfigStore, AwsAuthSource, IdentityCache,
    KubeAuthConfigStore,
};
use eksbridge_rbac::{
    AccessPolicyReconciler, AccessPolicyRegistry, BindingInspector, BindingReconciler,
    KubeRbacClient, RbacClient,
};
use kube::Client;
use tracing::{info, instrument};

use crate::access_policies::AccessPolicySyncer;
use crate::cluster_reader::{ClusterReader, KubeClusterReader};
use crate::cluster_roles::ClusterRoleSyncer;
use crate::config::ConnectorConfig;
use crate::iam_roles::{IamRoleSyncer, RoleRegistry};
use crate::namespaces::NamespaceCache;
use crate::resource::{ResourceId, ResourceType};
use crate::roles::RoleSyncer;
use crate::Result;

/// The upstream collaborators a connector talks to
#[derive(Clone)]
pub struct Collaborators {
    /// aws-auth ConfigMap storage
    pub auth_config: Arc<dyn AuthConfigStore>,
    /// EKS access entries
    pub access_entries: Arc<dyn AccessEntryRegistry>,
    /// EKS access policy associations
    pub access_policies: Arc<dyn AccessPolicyRegistry>,
    /// ClusterRole, Role and Namespace listings
    pub cluster: Arc<dyn ClusterReader>,
    /// Binding lookups
    pub inspector: Arc<dyn BindingInspector>,
    /// Binding writes
    pub rbac: Arc<dyn RbacClient>,
    /// IAM roles and trust policies
    pub roles: Arc<dyn RoleRegistry>,
}

/// Syncers and reconcilers for one cluster
pub struct Connector {
    config: ConnectorConfig,
    identity: Arc<IdentityCache>,
    cluster_roles: ClusterRoleSyncer,
    roles: RoleSyncer,
    access_policies: AccessPolicySyncer,
    iam_roles: IamRoleSyncer,
}

impl Connector {
    /// Build a connector over `collaborators`
    pub fn new(config: ConnectorConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let aws_auth = Arc::new(AwsAuthSource::new(collaborators.auth_config));
        let identity = Arc::new(IdentityCache::new(
            aws_auth.clone(),
            Arc::new(AccessEntrySource::new(collaborators.access_entries)),
            config.identity_cache_ttl(),
        ));
        let bindings = Arc::new(BindingReconciler::new(
            aws_auth,
            collaborators.inspector.clone(),
            collaborators.rbac,
        ));
        let policies = Arc::new(AccessPolicyReconciler::new(collaborators.access_policies));
        let namespaces = Arc::new(NamespaceCache::new(
            collaborators.cluster.clone(),
            config.namespace_cache_ttl(),
        ));

        let cluster_roles = ClusterRoleSyncer::new(
            collaborators.cluster.clone(),
            namespaces,
            collaborators.inspector.clone(),
            identity.clone(),
            bindings.clone(),
        );
        let roles = RoleSyncer::new(
            collaborators.cluster.clone(),
            collaborators.inspector,
            identity.clone(),
            bindings,
        );
        let access_policies = AccessPolicySyncer::new(collaborators.cluster, policies);
        let iam_roles = IamRoleSyncer::new(collaborators.roles);

        info!(cluster = %config.cluster_name, "connector initialized");
        Ok(Self {
            config,
            identity,
            cluster_roles,
            roles,
            access_policies,
            iam_roles,
        })
    }

    /// Build a connector whose cluster-side collaborators use `client`
    ///
    /// The cloud registries have no kube equivalent and are passed in.
    pub fn for_kube(
        client: Client,
        config: ConnectorConfig,
        access_entries: Arc<dyn AccessEntryRegistry>,
        access_policies: Arc<dyn AccessPolicyRegistry>,
        roles: Arc<dyn RoleRegistry>,
    ) -> Result<Self> {
        let rbac = Arc::new(KubeRbacClient::new(client.clone()));
        let collaborators = Collaborators {
            auth_config: Arc::new(KubeAuthConfigStore::new(
                client.clone(),
                config.aws_auth_namespace.clone(),
                config.aws_auth_name.clone(),
            )),
            access_entries,
            access_policies,
            cluster: Arc::new(KubeClusterReader::new(client)),
            inspector: rbac.clone(),
            rbac,
            roles,
        };
        Self::new(config, collaborators)
    }

    /// Active configuration
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Shared identity mapping cache
    pub fn identity(&self) -> &Arc<IdentityCache> {
        &self.identity
    }

    /// Resource types this connector syncs or grants to
    pub fn resource_types(&self) -> &'static [ResourceType] {
        &ResourceType::ALL
    }

    /// ClusterRole syncer
    pub fn cluster_roles(&self) -> &ClusterRoleSyncer {
        &self.cluster_roles
    }

    /// Role syncer
    pub fn roles(&self) -> &RoleSyncer {
        &self.roles
    }

    /// Access policy syncer
    pub fn access_policies(&self) -> &AccessPolicySyncer {
        &self.access_policies
    }

    /// IAM role syncer
    pub fn iam_roles(&self) -> &IamRoleSyncer {
        &self.iam_roles
    }

    /// Grant `entitlement` to `principal`
    #[instrument(skip(self, principal), fields(principal = %principal.resource))]
    pub async fn grant(&self, principal: &ResourceId, entitlement: &str) -> Result<GrantOutcome> {
        let kind = provisioned_kind(entitlement)?;
        let outcome = self
            .with_deadline("grant", async {
                match kind {
                    Kind::ClusterRole => self.cluster_roles.grant(principal, entitlement).await,
                    Kind::Role => self.roles.grant(principal, entitlement).await,
                    Kind::AccessPolicy => self.access_policies.grant(principal, entitlement).await,
                }
            })
            .await?;
        info!(outcome = ?outcome, "grant finished");
        Ok(outcome)
    }

    /// Revoke `entitlement` from `principal`
    #[instrument(skip(self, principal), fields(principal = %principal.resource))]
    pub async fn revoke(&self, principal: &ResourceId, entitlement: &str) -> Result<RevokeOutcome> {
        let kind = provisioned_kind(entitlement)?;
        let outcome = self
            .with_deadline("revoke", async {
                match kind {
                    Kind::ClusterRole => self.cluster_roles.revoke(principal, entitlement).await,
                    Kind::Role => self.roles.revoke(principal, entitlement).await,
                    Kind::AccessPolicy => self.access_policies.revoke(principal, entitlement).await,
                }
            })
            .await?;
        info!(outcome = ?outcome, "revoke finished");
        Ok(outcome)
    }

    async fn with_deadline<T>(
        &self,
        operation: &str,
        request: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.config.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| Error::timeout(operation))?,
            None => request.await,
        }
    }
}

enum Kind {
    ClusterRole,
    Role,
    AccessPolicy,
}

fn provisioned_kind(entitlement: &str) -> Result<Kind> {
    let id = EntitlementId::decode(entitlement)?;
    match id.kind() {
        k if k == ResourceType::CLUSTER_ROLE.id => Ok(Kind::ClusterRole),
        k if k == ResourceType::ROLE.id => Ok(Kind::Role),
        k if k == ResourceType::ACCESS_POLICY.id => Ok(Kind::AccessPolicy),
        other => Err(Error::validation_for_field(
            "entitlement",
            format!("{other} entitlements cannot be provisioned"),
        )),
    }
}
