//! Identity mappings between IAM principals and Kubernetes usernames/groups
//!
//! Two sources feed the mappings: the aws-auth bootstrap ConfigMap and the
//! cluster's EKS access entries. `IdentityCache` merges them behind a TTL
//! and answers reverse lookups; `AwsAuthSource` also resolves (and creates)
//! the username a principal authenticates as.

#![deny(missing_docs)]

pub mod access_entries;
pub mod aws_auth;
pub mod cache;
pub mod directory;
pub mod mappings;

pub use access_entries::{AccessEntry, AccessEntryRegistry, AccessEntrySource};
pub use aws_auth::{AuthConfigStore, AwsAuthConfigMap, AwsAuthSource, KubeAuthConfigStore};
pub use cache::{IdentityCache, IdentityLookup, DEFAULT_IDENTITY_TTL};
pub use directory::{ResolvedUsername, UsernameDirectory};
pub use mappings::{IdentityMappings, MappingSource};

pub use eksbridge_common::{Error, Result};
