use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Access tier. Mutated only by the entitlement granter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Premium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// None for guest accounts.
    pub email: Option<String>,
    pub is_guest: bool,
    pub tier: Tier,
    /// Entitlement expiry, Unix epoch milliseconds. None while free.
    pub subscription_valid_until: Option<i64>,
    /// Monotonic counter embedded in access tokens; a mismatch against this
    /// value marks a token's entitlement claims stale.
    pub entitlement_version: i64,
    /// Opaque correlation token issued at purchase time, before an account
    /// may exist.
    pub app_account_token: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub email: Option<String>,
    #[serde(default)]
    pub is_guest: bool,
    #[serde(default)]
    pub app_account_token: Option<String>,
}
