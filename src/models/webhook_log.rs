use serde::{Deserialize, Serialize};

/// One row per processed notification; the unique `notification_uuid` is
/// the idempotency gate for at-least-once webhook delivery. Immutable once
/// written, pruned after the retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: String,
    pub notification_uuid: String,
    pub notification_type: String,
    pub subtype: Option<String>,
    pub original_transaction_id: String,
    /// Envelope signing time, Unix epoch milliseconds.
    pub signed_date: Option<i64>,
    pub processed_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateWebhookLog {
    pub notification_uuid: String,
    pub notification_type: String,
    pub subtype: Option<String>,
    pub original_transaction_id: String,
    pub signed_date: Option<i64>,
}
