//! Common types for eksbridge: errors, ARN classification, entitlement ids

#![deny(missing_docs)]

pub mod arn;
pub mod entitlement;
pub mod error;
pub mod outcome;
pub mod telemetry;

pub use entitlement::{EntitlementId, EntitlementScope};
pub use error::Error;
pub use outcome::{GrantOutcome, RevokeOutcome};

use serde::{Deserialize, Serialize};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group used for every subject eksbridge writes into a binding
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Namespace holding the aws-auth bootstrap ConfigMap
pub const DEFAULT_AWS_AUTH_NAMESPACE: &str = "kube-system";

/// Name of the aws-auth bootstrap ConfigMap
pub const DEFAULT_AWS_AUTH_NAME: &str = "aws-auth";

/// Prefix of every binding created by eksbridge
pub const BINDING_NAME_PREFIX: &str = "eksbridge";

/// Default lifetime of a cached identity snapshot or namespace list, in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// One page of an upstream listing
///
/// `next_token` is opaque to eksbridge and is passed back unchanged to
/// fetch the following page. `None` means the listing is exhausted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Cursor for the next page, if any
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    /// A page with no continuation
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }

    /// A page followed by more results
    pub fn with_next(items: Vec<T>, next_token: impl Into<String>) -> Self {
        Self {
            items,
            next_token: Some(next_token.into()),
        }
    }

    /// Map the items of a page, keeping the cursor
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_token: self.next_token,
        }
    }
}

/// Normalize an empty continuation token to `None`
///
/// Kubernetes list metadata and the AWS APIs both report "no more pages"
/// as either an absent or an empty string.
pub fn next_token(raw: Option<String>) -> Option<String> {
    raw.filter(|t| !t.is_empty())
}
