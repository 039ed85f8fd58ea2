//! Idempotent reconciliation of Kubernetes RBAC bindings and EKS access policies

#![deny(missing_docs)]

pub mod access_policy;
pub mod binding;
pub mod client;
pub mod engine;
pub mod inspector;

pub use access_policy::{
    AccessPolicyReconciler, AccessPolicyRegistry, AccessScope, AssociatedPolicy, RequestedScope,
};
pub use binding::{canonical_binding_name, Binding, BindingScope, RoleKind, RoleTarget};
pub use client::{KubeRbacClient, RbacClient};
pub use engine::BindingReconciler;
pub use inspector::{BindingInspector, MatchingBindings};

pub use eksbridge_common::{Error, Result};
