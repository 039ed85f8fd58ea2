//! Entitlement identifier codec
//!
//! Two forms are recognized:
//!
//! - `<kind>:<resource-id>:assigned:<scope>` where `scope` is `cluster` or a
//!   namespace name
//! - `<kind>:<resource-id>:assumes` for IAM role trust
//!
//! A namespace literally named `cluster` is written `ns:cluster` so it can
//! never decode as cluster scope. No other namespace takes the `ns:` form.
//!
//! Resource ids are ARNs and may contain colons, so the kind is split at the
//! first colon and the suffix at the last `:assigned:`. Anything outside the
//! grammar is rejected; a missing or malformed scope never falls back to
//! cluster scope.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

const ASSIGNED_MARKER: &str = ":assigned:";
const ASSUMES_SUFFIX: &str = ":assumes";
const CLUSTER_SCOPE: &str = "cluster";
const NAMESPACE_ESCAPE: &str = "ns:";
const MAX_NAMESPACE_LEN: usize = 63;

/// Scope encoded in an `assigned` entitlement
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntitlementScope {
    /// Cluster-wide assignment
    Cluster,
    /// Assignment confined to one namespace
    Namespace(String),
}

impl EntitlementScope {
    /// Parse the scope segment of an entitlement id
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == CLUSTER_SCOPE {
            return Some(Self::Cluster);
        }
        if let Some(escaped) = raw.strip_prefix(NAMESPACE_ESCAPE) {
            return (escaped == CLUSTER_SCOPE).then(|| Self::Namespace(escaped.to_string()));
        }
        is_dns_label(raw).then(|| Self::Namespace(raw.to_string()))
    }

    /// Namespace name, if namespace-scoped
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Cluster => None,
            Self::Namespace(ns) => Some(ns),
        }
    }
}

impl fmt::Display for EntitlementScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => f.write_str(CLUSTER_SCOPE),
            Self::Namespace(ns) if ns == CLUSTER_SCOPE => write!(f, "{NAMESPACE_ESCAPE}{ns}"),
            Self::Namespace(ns) => f.write_str(ns),
        }
    }
}

/// A decoded entitlement identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntitlementId {
    /// `<kind>:<resource>:assigned:<scope>`
    Assigned {
        /// Resource type id (e.g. `cluster_role`)
        kind: String,
        /// Resource id within that type
        resource: String,
        /// Where the assignment applies
        scope: EntitlementScope,
    },
    /// `<kind>:<resource>:assumes`
    Assumes {
        /// Resource type id (e.g. `iam_role`)
        kind: String,
        /// Resource id within that type
        resource: String,
    },
}

impl EntitlementId {
    /// Build an `assigned` entitlement id
    pub fn assigned(
        kind: impl Into<String>,
        resource: impl Into<String>,
        scope: EntitlementScope,
    ) -> Self {
        Self::Assigned {
            kind: kind.into(),
            resource: resource.into(),
            scope,
        }
    }

    /// Build an `assumes` entitlement id
    pub fn assumes(kind: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::Assumes {
            kind: kind.into(),
            resource: resource.into(),
        }
    }

    /// Decode an entitlement id
    pub fn decode(raw: &str) -> Result<Self> {
        let invalid = |msg: &str| Error::invalid_entitlement(raw, msg);

        let (kind, rest) = raw
            .split_once(':')
            .ok_or_else(|| invalid("missing resource type"))?;
        if kind.is_empty() {
            return Err(invalid("empty resource type"));
        }

        if let Some(resource) = rest.strip_suffix(ASSUMES_SUFFIX) {
            if resource.is_empty() {
                return Err(invalid("empty resource id"));
            }
            return Ok(Self::assumes(kind, resource));
        }

        let at = rest
            .rfind(ASSIGNED_MARKER)
            .ok_or_else(|| invalid("expected ':assigned:<scope>' or ':assumes' suffix"))?;
        let resource = &rest[..at];
        let scope_raw = &rest[at + ASSIGNED_MARKER.len()..];
        if resource.is_empty() {
            return Err(invalid("empty resource id"));
        }
        if scope_raw.is_empty() {
            return Err(invalid("empty scope"));
        }
        let scope = EntitlementScope::parse(scope_raw)
            .ok_or_else(|| invalid("scope must be 'cluster' or a namespace name"))?;

        Ok(Self::assigned(kind, resource, scope))
    }

    /// Resource type id
    pub fn kind(&self) -> &str {
        match self {
            Self::Assigned { kind, .. } | Self::Assumes { kind, .. } => kind,
        }
    }

    /// Resource id within the type
    pub fn resource(&self) -> &str {
        match self {
            Self::Assigned { resource, .. } | Self::Assumes { resource, .. } => resource,
        }
    }

    /// Assignment scope, for `assigned` ids
    pub fn scope(&self) -> Option<&EntitlementScope> {
        match self {
            Self::Assigned { scope, .. } => Some(scope),
            Self::Assumes { .. } => None,
        }
    }

    /// Entitlement slug without the resource prefix (`assigned:default`, `assumes`)
    pub fn slug(&self) -> String {
        match self {
            Self::Assigned { scope, .. } => format!("assigned:{scope}"),
            Self::Assumes { .. } => "assumes".to_string(),
        }
    }

    /// Ensure the id belongs to the given resource, returning its scope
    ///
    /// Used by grant and revoke, which only accept `assigned` ids for the
    /// resource they were routed to.
    pub fn expect_assigned(&self, kind: &str, resource: &str) -> Result<&EntitlementScope> {
        match self {
            Self::Assigned {
                kind: k,
                resource: r,
                scope,
            } if k == kind && r == resource => Ok(scope),
            Self::Assigned { .. } => Err(Error::invalid_entitlement(
                self.to_string(),
                format!("does not belong to {kind} {resource}"),
            )),
            Self::Assumes { .. } => Err(Error::invalid_entitlement(
                self.to_string(),
                "expected an assigned entitlement",
            )),
        }
    }
}

impl fmt::Display for EntitlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assigned {
                kind,
                resource,
                scope,
            } => write!(f, "{kind}:{resource}{ASSIGNED_MARKER}{scope}"),
            Self::Assumes { kind, resource } => write!(f, "{kind}:{resource}{ASSUMES_SUFFIX}"),
        }
    }
}

impl FromStr for EntitlementId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

/// True if `s` is a valid RFC 1123 label (Kubernetes namespace name)
pub fn is_dns_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_NAMESPACE_LEN
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}
