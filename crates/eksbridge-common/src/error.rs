//! Error types shared by every eksbridge crate
//!
//! Errors carry the operation that failed so a caller can tell which
//! upstream call (cluster API or identity registry) produced them. The
//! taxonomy separates transient upstream failures, semantic scope
//! conflicts, and malformed input so `is_retryable` can decide retries.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for eksbridge operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error, wrapped with the operation that triggered it
    #[error("kubernetes error during {operation}: {source}")]
    Kube {
        /// Operation that failed (e.g. "update RoleBinding default/view")
        operation: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Error reported by the cloud identity registry (IAM, EKS)
    #[error("upstream error during {operation}: {message}")]
    Upstream {
        /// Operation that failed (e.g. "list access entries")
        operation: String,
        /// Description of what failed
        message: String,
        /// Whether retrying the same call may succeed
        retryable: bool,
    },

    /// The addressed upstream object does not exist
    #[error("{resource} not found")]
    NotFound {
        /// Resource that was addressed
        resource: String,
    },

    /// The object being created already exists
    #[error("{resource} already exists")]
    AlreadyExists {
        /// Resource that was being created
        resource: String,
    },

    /// Cluster and namespace scopes collide for the same policy association
    #[error("scope conflict for {principal} on {policy}: {message}")]
    ScopeConflict {
        /// Principal ARN holding the association
        principal: String,
        /// Access policy ARN
        policy: String,
        /// Description of the conflict
        message: String,
    },

    /// Request failed validation before any upstream call
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The offending field, when one can be named
        field: Option<String>,
    },

    /// Entitlement identifier does not match the documented grammar
    #[error("invalid entitlement id '{id}': {message}")]
    InvalidEntitlement {
        /// The raw identifier
        id: String,
        /// Why it was rejected
        message: String,
    },

    /// A structured document (aws-auth rows, trust policy) could not be parsed
    #[error("malformed document [{context}]: {message}")]
    MalformedDocument {
        /// Which document was being parsed
        context: String,
        /// Parser message
        message: String,
    },

    /// Neither identity mapping source could be read
    #[error("no identity mappings available: aws-auth: {bootstrap}; access entries: {access_entries}")]
    MappingSourcesUnavailable {
        /// Failure of the aws-auth source
        bootstrap: Box<Error>,
        /// Failure of the access-entry source
        access_entries: Box<Error>,
    },

    /// Upstream call exceeded its deadline
    #[error("timed out during {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Wrap a kube-rs error with the operation that produced it
    pub fn kube(operation: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            operation: operation.into(),
            source,
        }
    }

    /// Create a retryable upstream error
    pub fn upstream(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Upstream {
            operation: operation.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable upstream error (access denied, bad request)
    pub fn upstream_permanent(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Upstream {
            operation: operation.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
        }
    }

    /// Create a scope conflict error
    pub fn scope_conflict(
        principal: impl Into<String>,
        policy: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ScopeConflict {
            principal: principal.into(),
            policy: policy.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an invalid entitlement error
    pub fn invalid_entitlement(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidEntitlement {
            id: id.into(),
            message: msg.into(),
        }
    }

    /// Create a malformed document error
    pub fn malformed(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedDocument {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True if the error means the addressed object is gone
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube { source, .. } => is_kube_status(source, 404),
            _ => false,
        }
    }

    /// True if the error means the object being created already exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists { .. } => true,
            Error::Kube { source, .. } => is_kube_status(source, 409) && !is_conflict_reason(source),
            _ => false,
        }
    }

    /// True if the error is an optimistic-concurrency conflict on update
    pub fn is_update_conflict(&self) -> bool {
        matches!(self, Error::Kube { source, .. } if is_conflict_reason(source))
    }

    /// Check if this error is retryable
    ///
    /// Transport errors, 5xx responses and resourceVersion conflicts are
    /// retryable. Scope conflicts, validation and malformed input need a
    /// human to change something first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source, .. } => match source {
                kube::Error::Api(ae) => ae.code >= 500 || ae.code == 409 || ae.code == 429,
                _ => true,
            },
            Error::Upstream { retryable, .. } => *retryable,
            Error::NotFound { .. } => false,
            Error::AlreadyExists { .. } => false,
            Error::ScopeConflict { .. } => false,
            Error::Validation { .. } => false,
            Error::InvalidEntitlement { .. } => false,
            Error::MalformedDocument { .. } => false,
            Error::MappingSourcesUnavailable { .. } => true,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the operation if this error wraps an upstream call
    pub fn operation(&self) -> Option<&str> {
        match self {
            Error::Kube { operation, .. } => Some(operation),
            Error::Upstream { operation, .. } => Some(operation),
            Error::Timeout { operation } => Some(operation),
            _ => None,
        }
    }
}

fn is_kube_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code)
}

fn is_conflict_reason(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "Conflict")
}
