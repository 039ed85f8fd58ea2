//! Idempotent grant and revoke of a role through RBAC bindings
//!
//! A grant resolves (or creates) the principal's username, then makes sure
//! some binding of the role at the requested scope lists `User/<username>`.
//! A revoke removes that subject again and deletes bindings left empty.
//! Nothing is locked across requests: concurrent writers race on
//! resourceVersion and the loser gets a retryable conflict.

use std::sync::Arc;

use eksbridge_common::{Error, GrantOutcome, RevokeOutcome};
use eksbridge_identity::UsernameDirectory;
use tracing::{debug, info};

use crate::binding::{canonical_binding_name, Binding, BindingScope, RoleKind, RoleTarget};
use crate::client::RbacClient;
use crate::inspector::BindingInspector;
use crate::Result;

/// Grants and revokes roles by editing RoleBindings and ClusterRoleBindings
pub struct BindingReconciler {
    directory: Arc<dyn UsernameDirectory>,
    inspector: Arc<dyn BindingInspector>,
    client: Arc<dyn RbacClient>,
}

impl BindingReconciler {
    /// Create a reconciler over the given collaborators
    pub fn new(
        directory: Arc<dyn UsernameDirectory>,
        inspector: Arc<dyn BindingInspector>,
        client: Arc<dyn RbacClient>,
    ) -> Self {
        Self {
            directory,
            inspector,
            client,
        }
    }

    /// Bindings of `role` at `scope`
    pub async fn bindings_at(&self, role: &RoleTarget, scope: &BindingScope) -> Result<Vec<Binding>> {
        Ok(self.inspector.matching_bindings(role).await?.narrow(scope))
    }

    /// Make sure `principal` holds `role` at `scope`
    pub async fn grant(
        &self,
        principal: &str,
        role: &RoleTarget,
        scope: &BindingScope,
    ) -> Result<GrantOutcome> {
        check_scope(role, scope)?;

        let resolved = self.directory.resolve_or_create_username(principal).await?;
        let username = resolved.username.as_str();
        if resolved.created {
            info!(principal = %principal, username = %username, "created username mapping for grant");
        }

        let candidates = self.bindings_at(role, scope).await?;
        if let Some(existing) = candidates.iter().find(|b| b.has_user(username)) {
            debug!(
                principal = %principal,
                role = %role,
                binding = %existing.describe(),
                "principal already bound"
            );
            return Ok(GrantOutcome::AlreadySatisfied);
        }

        let canonical = canonical_binding_name(role, scope);
        match candidates.into_iter().find(|b| b.name() == canonical) {
            Some(mut binding) => {
                binding.add_user(username);
                self.update(&binding).await?;
                info!(principal = %principal, role = %role, binding = %binding.describe(), "added subject to binding");
            }
            None => {
                let binding = Binding::new_for_user(role, scope, username);
                self.create(&binding).await?;
                info!(principal = %principal, role = %role, binding = %binding.describe(), "created binding");
            }
        }
        Ok(GrantOutcome::Applied)
    }

    /// Make sure `principal` no longer holds `role` at `scope`
    ///
    /// Never creates a username mapping. The user subject is removed from
    /// every binding of the role at that scope; bindings left without
    /// subjects are deleted.
    pub async fn revoke(
        &self,
        principal: &str,
        role: &RoleTarget,
        scope: &BindingScope,
    ) -> Result<RevokeOutcome> {
        check_scope(role, scope)?;

        let Some(username) = self.directory.resolve_username(principal).await? else {
            debug!(principal = %principal, "principal has no username mapping, nothing to revoke");
            return Ok(RevokeOutcome::AlreadyRevoked);
        };

        let holding: Vec<Binding> = self
            .bindings_at(role, scope)
            .await?
            .into_iter()
            .filter(|b| b.has_user(&username))
            .collect();
        if holding.is_empty() {
            debug!(principal = %principal, role = %role, scope = %scope, "principal not bound");
            return Ok(RevokeOutcome::AlreadyRevoked);
        }

        for mut binding in holding {
            if binding.remove_user(&username) == 0 {
                self.delete(&binding).await?;
                info!(principal = %principal, binding = %binding.describe(), "deleted binding with no subjects left");
            } else {
                self.update(&binding).await?;
                info!(principal = %principal, binding = %binding.describe(), "removed subject from binding");
            }
        }
        Ok(RevokeOutcome::Applied)
    }

    async fn create(&self, binding: &Binding) -> Result<()> {
        match binding {
            Binding::Namespaced(rb) => self.client.create_role_binding(rb).await,
            Binding::Cluster(crb) => self.client.create_cluster_role_binding(crb).await,
        }
    }

    async fn update(&self, binding: &Binding) -> Result<()> {
        match binding {
            Binding::Namespaced(rb) => self.client.update_role_binding(rb).await,
            Binding::Cluster(crb) => self.client.update_cluster_role_binding(crb).await,
        }
    }

    async fn delete(&self, binding: &Binding) -> Result<()> {
        let result = match binding {
            Binding::Namespaced(_) => {
                let namespace = binding.namespace().ok_or_else(|| {
                    Error::validation_for_field("metadata.namespace", "RoleBinding has no namespace")
                })?;
                self.client.delete_role_binding(namespace, binding.name()).await
            }
            Binding::Cluster(_) => self.client.delete_cluster_role_binding(binding.name()).await,
        };
        match result {
            Err(e) if e.is_not_found() => {
                debug!(binding = %binding.describe(), "binding already deleted");
                Ok(())
            }
            other => other,
        }
    }
}

/// A Role can only be bound inside its own namespace
fn check_scope(role: &RoleTarget, scope: &BindingScope) -> Result<()> {
    match (&role.kind, scope) {
        (RoleKind::ClusterRole, _) => Ok(()),
        (RoleKind::Role { namespace }, BindingScope::Namespace(ns)) if ns == namespace => Ok(()),
        (RoleKind::Role { namespace }, _) => Err(Error::validation_for_field(
            "scope",
            format!(
                "role {namespace}/{} can only be bound in namespace {namespace}, not at {scope}",
                role.name
            ),
        )),
    }
}
