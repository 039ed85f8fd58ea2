//! Binding model: role targets, scopes and the tagged binding enum

use std::collections::BTreeMap;

use eksbridge_common::{EntitlementScope, BINDING_NAME_PREFIX, RBAC_API_GROUP};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Subject kind of every subject eksbridge writes
pub const USER_SUBJECT_KIND: &str = "User";

/// Label marking bindings created by eksbridge
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Kind of role a binding points at
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RoleKind {
    /// Cluster-wide role, bindable at cluster or namespace scope
    ClusterRole,
    /// Namespaced role, bindable only in its own namespace
    Role {
        /// Namespace the role lives in
        namespace: String,
    },
}

/// The role a grant or revoke is about
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoleTarget {
    /// ClusterRole or Role
    pub kind: RoleKind,
    /// Role name
    pub name: String,
}

impl RoleTarget {
    /// Target a ClusterRole
    pub fn cluster_role(name: impl Into<String>) -> Self {
        Self {
            kind: RoleKind::ClusterRole,
            name: name.into(),
        }
    }

    /// Target a namespaced Role
    pub fn role(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: RoleKind::Role {
                namespace: namespace.into(),
            },
            name: name.into(),
        }
    }

    /// `roleRef.kind` of bindings to this role
    pub fn ref_kind(&self) -> &'static str {
        match self.kind {
            RoleKind::ClusterRole => "ClusterRole",
            RoleKind::Role { .. } => "Role",
        }
    }

    /// Namespace of a Role target
    pub fn namespace(&self) -> Option<&str> {
        match &self.kind {
            RoleKind::ClusterRole => None,
            RoleKind::Role { namespace } => Some(namespace),
        }
    }

    /// `roleRef` of bindings to this role
    pub fn role_ref(&self) -> RoleRef {
        RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: self.ref_kind().to_string(),
            name: self.name.clone(),
        }
    }

    /// True if a binding's `roleRef` points at this role
    pub fn matches(&self, role_ref: &RoleRef) -> bool {
        role_ref.kind == self.ref_kind() && role_ref.name == self.name
    }
}

impl std::fmt::Display for RoleTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            RoleKind::ClusterRole => write!(f, "ClusterRole {}", self.name),
            RoleKind::Role { namespace } => write!(f, "Role {namespace}/{}", self.name),
        }
    }
}

/// Where a grant applies
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingScope {
    /// ClusterRoleBinding
    Cluster,
    /// RoleBinding in this namespace
    Namespace(String),
}

impl BindingScope {
    /// Namespace of a namespace scope
    pub fn namespace(&self) -> Option<&str> {
        match self {
            BindingScope::Cluster => None,
            BindingScope::Namespace(ns) => Some(ns),
        }
    }
}

impl From<&EntitlementScope> for BindingScope {
    fn from(scope: &EntitlementScope) -> Self {
        match scope {
            EntitlementScope::Cluster => BindingScope::Cluster,
            EntitlementScope::Namespace(ns) => BindingScope::Namespace(ns.clone()),
        }
    }
}

impl std::fmt::Display for BindingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingScope::Cluster => f.write_str("cluster"),
            BindingScope::Namespace(ns) => write!(f, "namespace {ns}"),
        }
    }
}

/// Name eksbridge uses for the binding of `role` at `scope`
///
/// Role bindings carry a `role-` marker so a ClusterRole and a Role of the
/// same name bound in the same namespace never share a binding name.
pub fn canonical_binding_name(role: &RoleTarget, scope: &BindingScope) -> String {
    let name = &role.name;
    match (&role.kind, scope) {
        (_, BindingScope::Cluster) => format!("{BINDING_NAME_PREFIX}-{name}-binding"),
        (RoleKind::ClusterRole, BindingScope::Namespace(ns)) => {
            format!("{BINDING_NAME_PREFIX}-{name}-{ns}-binding")
        }
        (RoleKind::Role { .. }, BindingScope::Namespace(ns)) => {
            format!("{BINDING_NAME_PREFIX}-role-{name}-{ns}-binding")
        }
    }
}

/// A `User` subject in the RBAC API group
pub fn user_subject(username: &str) -> Subject {
    Subject {
        api_group: Some(RBAC_API_GROUP.to_string()),
        kind: USER_SUBJECT_KIND.to_string(),
        name: username.to_string(),
        namespace: None,
    }
}

fn is_user(subject: &Subject, username: &str) -> bool {
    subject.kind == USER_SUBJECT_KIND && subject.name == username
}

/// A RoleBinding or a ClusterRoleBinding
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    /// Namespaced RoleBinding
    Namespaced(RoleBinding),
    /// ClusterRoleBinding
    Cluster(ClusterRoleBinding),
}

impl Binding {
    /// A new binding of `role` at `scope` holding exactly one user subject
    pub fn new_for_user(role: &RoleTarget, scope: &BindingScope, username: &str) -> Self {
        let metadata = ObjectMeta {
            name: Some(canonical_binding_name(role, scope)),
            namespace: scope.namespace().map(str::to_string),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                BINDING_NAME_PREFIX.to_string(),
            )])),
            ..Default::default()
        };
        let subjects = Some(vec![user_subject(username)]);
        match scope {
            BindingScope::Cluster => Binding::Cluster(ClusterRoleBinding {
                metadata,
                role_ref: role.role_ref(),
                subjects,
            }),
            BindingScope::Namespace(_) => Binding::Namespaced(RoleBinding {
                metadata,
                role_ref: role.role_ref(),
                subjects,
            }),
        }
    }

    /// Binding name
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Namespace of a RoleBinding
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Binding::Namespaced(b) => b.metadata.namespace.as_deref(),
            Binding::Cluster(_) => None,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Binding::Namespaced(b) => &b.metadata,
            Binding::Cluster(b) => &b.metadata,
        }
    }

    /// The role this binding points at
    pub fn role_ref(&self) -> &RoleRef {
        match self {
            Binding::Namespaced(b) => &b.role_ref,
            Binding::Cluster(b) => &b.role_ref,
        }
    }

    /// Subjects, empty if unset
    pub fn subjects(&self) -> &[Subject] {
        match self {
            Binding::Namespaced(b) => b.subjects.as_deref().unwrap_or_default(),
            Binding::Cluster(b) => b.subjects.as_deref().unwrap_or_default(),
        }
    }

    /// Replace the subject list
    pub fn set_subjects(&mut self, subjects: Vec<Subject>) {
        match self {
            Binding::Namespaced(b) => b.subjects = Some(subjects),
            Binding::Cluster(b) => b.subjects = Some(subjects),
        }
    }

    /// True if the binding lists `User/<username>`
    pub fn has_user(&self, username: &str) -> bool {
        self.subjects().iter().any(|s| is_user(s, username))
    }

    /// Append a user subject
    pub fn add_user(&mut self, username: &str) {
        let mut subjects = self.subjects().to_vec();
        subjects.push(user_subject(username));
        self.set_subjects(subjects);
    }

    /// Remove every `User/<username>` subject, returning how many remain
    ///
    /// Groups and service accounts with the same name are left alone.
    pub fn remove_user(&mut self, username: &str) -> usize {
        let remaining: Vec<Subject> = self
            .subjects()
            .iter()
            .filter(|s| !is_user(s, username))
            .cloned()
            .collect();
        let left = remaining.len();
        self.set_subjects(remaining);
        left
    }

    /// `Kind namespace/name` for logs and error messages
    pub fn describe(&self) -> String {
        match self {
            Binding::Namespaced(_) => {
                format!("RoleBinding {}/{}", self.namespace().unwrap_or_default(), self.name())
            }
            Binding::Cluster(_) => format!("ClusterRoleBinding {}", self.name()),
        }
    }
}
