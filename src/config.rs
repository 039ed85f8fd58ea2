//! Connector configuration
//!
//! Every flag can also be set from the environment, and the struct
//! round-trips through serde so a host can load it from a file instead.

use std::time::Duration;

use clap::Args;
use eksbridge_common::arn::{self, PrincipalKind};
use eksbridge_common::{
    Error, Result, DEFAULT_AWS_AUTH_NAME, DEFAULT_AWS_AUTH_NAMESPACE, DEFAULT_CACHE_TTL_SECS,
};
use serde::{Deserialize, Serialize};

/// Default per-request deadline in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Longest accepted cache lifetime in seconds (one day)
pub const MAX_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Longest accepted per-request deadline in seconds
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 60 * 60;

/// Configuration of one connector instance, bound to one EKS cluster
#[derive(Args, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectorConfig {
    /// Name of the EKS cluster to reconcile
    #[arg(long, env = "EKSBRIDGE_CLUSTER_NAME")]
    pub cluster_name: String,

    /// AWS region of the cluster
    #[arg(long, env = "EKSBRIDGE_REGION")]
    pub region: Option<String>,

    /// IAM role assumed for every cloud call
    #[arg(long, env = "EKSBRIDGE_ASSUME_ROLE_ARN")]
    pub assume_role_arn: Option<String>,

    /// Namespace of the aws-auth ConfigMap
    #[arg(long, env = "EKSBRIDGE_AWS_AUTH_NAMESPACE", default_value = DEFAULT_AWS_AUTH_NAMESPACE)]
    pub aws_auth_namespace: String,

    /// Name of the aws-auth ConfigMap
    #[arg(long, env = "EKSBRIDGE_AWS_AUTH_NAME", default_value = DEFAULT_AWS_AUTH_NAME)]
    pub aws_auth_name: String,

    /// Lifetime of the merged identity mapping snapshot
    #[arg(long, env = "EKSBRIDGE_IDENTITY_CACHE_TTL_SECS", default_value_t = DEFAULT_CACHE_TTL_SECS)]
    pub identity_cache_ttl_secs: u64,

    /// Lifetime of the cached namespace list
    #[arg(long, env = "EKSBRIDGE_NAMESPACE_CACHE_TTL_SECS", default_value_t = DEFAULT_CACHE_TTL_SECS)]
    pub namespace_cache_ttl_secs: u64,

    /// Deadline for one grant or revoke; 0 disables it
    #[arg(long, env = "EKSBRIDGE_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            region: None,
            assume_role_arn: None,
            aws_auth_namespace: DEFAULT_AWS_AUTH_NAMESPACE.to_string(),
            aws_auth_name: DEFAULT_AWS_AUTH_NAME.to_string(),
            identity_cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            namespace_cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ConnectorConfig {
    /// Configuration for `cluster_name` with every other field defaulted
    pub fn for_cluster(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            ..Default::default()
        }
    }

    /// Reject configurations the connector cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(Error::validation_for_field("cluster_name", "must not be empty"));
        }
        if self.aws_auth_namespace.is_empty() || self.aws_auth_name.is_empty() {
            return Err(Error::validation_for_field(
                "aws_auth",
                "aws-auth namespace and name must not be empty",
            ));
        }
        check_ttl("identity_cache_ttl_secs", self.identity_cache_ttl_secs)?;
        check_ttl("namespace_cache_ttl_secs", self.namespace_cache_ttl_secs)?;
        if self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(Error::validation_for_field(
                "request_timeout_secs",
                format!("must be at most {MAX_REQUEST_TIMEOUT_SECS}"),
            ));
        }
        if let Some(role) = &self.assume_role_arn {
            if arn::classify(role) != PrincipalKind::Role {
                return Err(Error::validation_for_field(
                    "assume_role_arn",
                    format!("{role} is not an IAM role ARN"),
                ));
            }
        }
        Ok(())
    }

    /// Identity snapshot lifetime
    pub fn identity_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.identity_cache_ttl_secs)
    }

    /// Namespace list lifetime
    pub fn namespace_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.namespace_cache_ttl_secs)
    }

    /// Per-request deadline, `None` when disabled
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

fn check_ttl(field: &str, secs: u64) -> Result<()> {
    if secs == 0 {
        return Err(Error::validation_for_field(field, "must be greater than zero"));
    }
    if secs > MAX_CACHE_TTL_SECS {
        return Err(Error::validation_for_field(
            field,
            format!("must be at most {MAX_CACHE_TTL_SECS}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        config: ConnectorConfig,
    }

    fn parse(args: &[&str]) -> ConnectorConfig {
        let argv = std::iter::once("eksbridge").chain(args.iter().copied());
        TestCli::try_parse_from(argv).unwrap().config
    }

    #[test]
    fn test_flags_and_defaults() {
        let config = parse(&[
            "--cluster-name",
            "prod",
            "--region",
            "us-west-2",
            "--identity-cache-ttl-secs",
            "60",
        ]);
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.identity_cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.namespace_cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.aws_auth_namespace, "kube-system");
        assert_eq!(config.aws_auth_name, "aws-auth");
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        config.validate().unwrap();
    }

    /// Story: configurations that cannot work are rejected up front
    #[test]
    fn story_invalid_configs_are_rejected() {
        let mut config = ConnectorConfig::for_cluster("  ");
        assert!(matches!(
            config.validate(),
            Err(Error::Validation { field: Some(f), .. }) if f == "cluster_name"
        ));

        config = ConnectorConfig {
            identity_cache_ttl_secs: 0,
            ..ConnectorConfig::for_cluster("prod")
        };
        assert!(config.validate().is_err());

        config = ConnectorConfig {
            namespace_cache_ttl_secs: 0,
            ..ConnectorConfig::for_cluster("prod")
        };
        assert!(config.validate().is_err());

        config = ConnectorConfig {
            assume_role_arn: Some("arn:aws:iam::123456789012:user/alice".to_string()),
            ..ConnectorConfig::for_cluster("prod")
        };
        assert!(config.validate().is_err());

        config.assume_role_arn = Some("arn:aws:iam::123456789012:role/eksbridge".to_string());
        config.validate().unwrap();
    }

    /// Story: cache lifetimes and deadlines are capped
    #[test]
    fn story_oversized_durations_are_rejected() {
        let config = ConnectorConfig {
            identity_cache_ttl_secs: u64::MAX,
            ..ConnectorConfig::for_cluster("prod")
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Validation { field: Some(f), .. }) if f == "identity_cache_ttl_secs"
        ));

        let config = ConnectorConfig {
            namespace_cache_ttl_secs: MAX_CACHE_TTL_SECS + 1,
            ..ConnectorConfig::for_cluster("prod")
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Validation { field: Some(f), .. }) if f == "namespace_cache_ttl_secs"
        ));

        let config = ConnectorConfig {
            request_timeout_secs: MAX_REQUEST_TIMEOUT_SECS + 1,
            ..ConnectorConfig::for_cluster("prod")
        };
        assert!(config.validate().is_err());

        let config = ConnectorConfig {
            identity_cache_ttl_secs: MAX_CACHE_TTL_SECS,
            namespace_cache_ttl_secs: MAX_CACHE_TTL_SECS,
            request_timeout_secs: MAX_REQUEST_TIMEOUT_SECS,
            ..ConnectorConfig::for_cluster("prod")
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_request_timeout_disables_deadline() {
        let config = ConnectorConfig {
            request_timeout_secs: 0,
            ..ConnectorConfig::for_cluster("prod")
        };
        assert_eq!(config.request_timeout(), None);
        config.validate().unwrap();
    }

    #[test]
    fn test_loads_from_partial_json() {
        let config: ConnectorConfig =
            serde_json::from_str(r#"{"clusterName":"prod","namespaceCacheTtlSecs":30}"#).unwrap();
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.namespace_cache_ttl_secs, 30);
        assert_eq!(config.identity_cache_ttl_secs, 300);
        assert_eq!(config.aws_auth_name, "aws-auth");
    }
}
