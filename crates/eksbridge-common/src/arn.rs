//! IAM principal ARN classification
//!
//! Only IAM users and roles can be mapped to Kubernetes usernames. Every
//! other principal (assumed-role sessions, federated users, service
//! principals, account roots) is `Unsupported`.

/// Partitions whose IAM ARNs are recognized
pub const SUPPORTED_PARTITIONS: &[&str] = &["aws", "aws-cn", "aws-us-gov"];

/// Kind of IAM principal named by an ARN
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    /// `arn:<partition>:iam::<account>:user/<path/name>`
    User,
    /// `arn:<partition>:iam::<account>:role/<path/name>`
    Role,
    /// Anything else
    Unsupported,
}

impl PrincipalKind {
    /// Lowercase label used in logs and error messages
    pub fn as_str(self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::Role => "role",
            PrincipalKind::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split an IAM ARN into its resource type and resource path
///
/// Returns `None` unless the ARN is an IAM ARN in a supported partition
/// with an empty region and a non-empty account.
fn iam_resource(principal: &str) -> Option<(&str, &str)> {
    let mut parts = principal.splitn(6, ':');
    let (prefix, partition, service, region, account, resource) = (
        parts.next()?,
        parts.next()?,
        parts.next()?,
        parts.next()?,
        parts.next()?,
        parts.next()?,
    );
    if prefix != "arn"
        || !SUPPORTED_PARTITIONS.contains(&partition)
        || service != "iam"
        || !region.is_empty()
        || account.is_empty()
    {
        return None;
    }
    let (kind, path) = resource.split_once('/')?;
    // the last path segment is the principal name and must be present
    if path.is_empty() || path.ends_with('/') {
        return None;
    }
    Some((kind, path))
}

/// Classify a principal ARN
pub fn classify(principal: &str) -> PrincipalKind {
    match iam_resource(principal) {
        Some(("user", _)) => PrincipalKind::User,
        Some(("role", _)) => PrincipalKind::Role,
        _ => PrincipalKind::Unsupported,
    }
}

/// True if the ARN names an IAM user or an IAM role
pub fn is_user_or_role(principal: &str) -> bool {
    classify(principal) != PrincipalKind::Unsupported
}

/// Extract the role name (last path segment) from an IAM role ARN
pub fn role_name_from_arn(arn: &str) -> Option<&str> {
    match iam_resource(arn)? {
        ("role", path) => path.rsplit('/').next(),
        _ => None,
    }
}
