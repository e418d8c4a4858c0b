use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Internal subscription status. The webhook path (notification types) and
/// the reconciliation path (numeric status codes) both resolve to this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    BillingRetry,
    GracePeriod,
    Expired,
    Revoked,
}

impl SubscriptionStatus {
    /// Whether this status grants access. Grace period and billing retry are
    /// lapsed-on-payment states during which access is still honored.
    pub fn is_entitled(self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active
                | SubscriptionStatus::GracePeriod
                | SubscriptionStatus::BillingRetry
        )
    }
}

/// One row per purchase lineage, keyed by the immutable original
/// transaction id. Never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    /// None while orphaned (purchased before account creation, or the
    /// owning account was deleted).
    pub user_id: Option<String>,
    pub is_orphaned: bool,
    pub app_account_token: Option<String>,
    pub original_transaction_id: String,
    /// "Production" or "Sandbox"; must match the deployment's expectation
    /// on the interactive verify path.
    pub environment: String,
    pub product_id: String,
    pub subscription_group_id: Option<String>,
    pub status: SubscriptionStatus,
    pub auto_renew_enabled: bool,
    /// Unix epoch milliseconds.
    pub expires_at: i64,
    pub last_renewal_at: Option<i64>,
    pub last_webhook_at: Option<i64>,
    pub last_notification_uuid: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Subscription {
    /// Entitled status and not yet past expiry.
    pub fn is_currently_valid(&self, now_ms: i64) -> bool {
        self.status.is_entitled() && self.expires_at > now_ms
    }
}

#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub user_id: Option<String>,
    pub app_account_token: Option<String>,
    pub original_transaction_id: String,
    pub environment: String,
    pub product_id: String,
    pub subscription_group_id: Option<String>,
    pub status: SubscriptionStatus,
    pub auto_renew_enabled: bool,
    pub expires_at: i64,
    pub last_renewal_at: Option<i64>,
}

/// Partial update applied through the shared upsert. Fields left `None` are
/// not touched.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    /// Links the subscription to a user and clears the orphan flag.
    pub user_id: Option<String>,
    pub status: Option<SubscriptionStatus>,
    pub expires_at: Option<i64>,
    pub auto_renew_enabled: Option<bool>,
    pub last_renewal_at: Option<i64>,
    pub last_webhook_at: Option<i64>,
    pub last_notification_uuid: Option<String>,
}
