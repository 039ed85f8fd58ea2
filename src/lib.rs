//! eksbridge - reconciles EKS identity mappings with Kubernetes RBAC
//!
//! eksbridge keeps an external access-governance system and an EKS cluster
//! in agreement. It lists the cluster's grantable resources, reports who
//! holds them, and grants or revokes them idempotently.
//!
//! # Architecture
//!
//! - IAM principals reach the cluster through the aws-auth ConfigMap and
//!   EKS access entries; both are merged into one cached identity snapshot
//! - ClusterRoles and Roles are granted by editing RoleBindings and
//!   ClusterRoleBindings
//! - EKS access policies are granted by editing policy associations, whose
//!   cluster and namespace scopes never overlap
//!
//! # Modules
//!
//! - [`config`] - Connector configuration (flags, env, file)
//! - [`resource`] - Resource, entitlement and grant model
//! - [`cluster_reader`] - Paginated ClusterRole/Role/Namespace listing
//! - [`namespaces`] - TTL cache of namespace names
//! - [`grants`] - Binding subjects to principal grants
//! - [`cluster_roles`] - ClusterRole syncer
//! - [`roles`] - Role syncer
//! - [`access_policies`] - EKS access policy syncer
//! - [`iam_roles`] - IAM role syncer
//! - [`trust_policy`] - IAM trust policy parsing
//! - [`connector`] - Wiring of the above for one cluster

#![deny(missing_docs)]

pub mod access_policies;
pub mod cluster_reader;
pub mod cluster_roles;
pub mod config;
pub mod connector;
pub mod grants;
pub mod iam_roles;
pub mod namespaces;
pub mod resource;
pub mod roles;
pub mod trust_policy;

#[cfg(test)]
mod test_support;

pub use config::ConnectorConfig;
pub use connector::{Collaborators, Connector};
pub use eksbridge_common::{Error, GrantOutcome, RevokeOutcome};
pub use resource::{Entitlement, Grant, Page, Resource, ResourceId, ResourceType};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
