//! IAM role trust policy parsing
//!
//! IAM returns `AssumeRolePolicyDocument` URL-encoded. Only `Allow`
//! statements granting `sts:AssumeRole` to `AWS` principals are of
//! interest; service and federated principals are ignored.

use eksbridge_common::{Error, Result};
use serde::Deserialize;

const ASSUME_ROLE_ACTION: &str = "sts:AssumeRole";
const ALLOW: &str = "Allow";

/// A JSON field that may hold a single value or a list
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

#[derive(Debug, Default, Deserialize)]
struct PrincipalMap {
    #[serde(rename = "AWS", default)]
    aws: OneOrMany<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PrincipalField {
    /// `"Principal": "*"`
    Wildcard(String),
    Map(PrincipalMap),
}

#[derive(Debug, Deserialize)]
struct Statement {
    #[serde(rename = "Effect", default)]
    effect: String,
    #[serde(rename = "Action", default)]
    action: OneOrMany<String>,
    #[serde(rename = "Principal")]
    principal: Option<PrincipalField>,
}

#[derive(Debug, Deserialize)]
struct TrustPolicy {
    #[serde(rename = "Statement", default)]
    statement: OneOrMany<Statement>,
}

/// URL-decode a policy document, treating `+` as a space
pub fn decode_policy_document(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| Error::malformed("trust policy", format!("invalid URL encoding: {e}")))
}

/// `AWS` principals allowed to assume the role, in document order
///
/// Wildcards are returned as-is; callers decide what to do with them.
pub fn trusted_principals(raw: &str) -> Result<Vec<String>> {
    let decoded = decode_policy_document(raw)?;
    let policy: TrustPolicy = serde_json::from_str(&decoded)
        .map_err(|e| Error::malformed("trust policy", e.to_string()))?;

    let mut principals = Vec::new();
    for statement in policy.statement.into_vec() {
        if statement.effect != ALLOW {
            continue;
        }
        let assumes = statement
            .action
            .into_vec()
            .iter()
            .any(|a| a.eq_ignore_ascii_case(ASSUME_ROLE_ACTION));
        if !assumes {
            continue;
        }
        match statement.principal {
            Some(PrincipalField::Wildcard(p)) => principals.push(p),
            Some(PrincipalField::Map(map)) => principals.extend(map.aws.into_vec()),
            None => {}
        }
    }
    Ok(principals)
}
