use serde::{Deserialize, Serialize};

use crate::models::Tier;

/// Custom claims for Timbre access tokens (non-standard JWT claims).
/// Standard claims (iss, sub, iat, exp) are handled by jwt-simple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub tier: Tier,
    #[serde(rename = "isGuest")]
    pub is_guest: bool,
    /// Entitlement version at issue time. A mismatch against the server's
    /// current value means the token's entitlement claims are stale and the
    /// client must refresh.
    #[serde(rename = "entV")]
    pub ent_v: i64,
    /// Entitlement expiry, Unix epoch seconds. None while free.
    #[serde(rename = "subValidUntil")]
    pub sub_valid_until: Option<i64>,
}

impl AccessClaims {
    pub fn for_user(user: &crate::models::User) -> Self {
        Self {
            tier: user.tier,
            is_guest: user.is_guest,
            ent_v: user.entitlement_version,
            sub_valid_until: user.subscription_valid_until.map(|ms| ms / 1000),
        }
    }
}
