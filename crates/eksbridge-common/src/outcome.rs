//! Outcomes of idempotent grant and revoke operations

use serde::{Deserialize, Serialize};

/// Result of a successful grant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantOutcome {
    /// Upstream state was changed
    Applied,
    /// The principal already held the entitlement; nothing was written
    AlreadySatisfied,
}

/// Result of a successful revoke
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevokeOutcome {
    /// Upstream state was changed
    Applied,
    /// The principal did not hold the entitlement; nothing was written
    AlreadyRevoked,
}

impl GrantOutcome {
    /// True if the grant changed upstream state
    pub fn is_applied(self) -> bool {
        self == GrantOutcome::Applied
    }
}

impl RevokeOutcome {
    /// True if the revoke changed upstream state
    pub fn is_applied(self) -> bool {
        self == RevokeOutcome::Applied
    }
}
