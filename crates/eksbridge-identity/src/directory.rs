//! Principal to Kubernetes username resolution

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Username a principal resolved to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedUsername {
    /// Kubernetes username
    pub username: String,
    /// True if the mapping was written by this call
    pub created: bool,
}

/// Resolves the Kubernetes username an IAM principal authenticates as
///
/// Lookup and creation are separate operations so revoke paths can
/// resolve without ever writing a mapping.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UsernameDirectory: Send + Sync {
    /// Username mapped to the principal, `None` if unmapped
    async fn resolve_username(&self, principal: &str) -> Result<Option<String>>;

    /// Username mapped to the principal, creating a self-mapping if unmapped
    async fn resolve_or_create_username(&self, principal: &str) -> Result<ResolvedUsername>;
}
