//! App Store server notification ingestion.
//!
//! Delivery is at-least-once and may race with reconciliation; the unique
//! webhook_log insert is the idempotency gate, taken before any mutation so
//! the same notification is never applied twice. Verification failures are
//! rejected with 400; every handled business outcome acknowledges with 200
//! to stop redelivery.

use axum::extract::State;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::appstore::{
    decode_notification, entitlement_action, status_for_notification, EntitlementAction,
    Notification, TrustVerifier,
};
use crate::db::{queries, AppState};
use crate::entitlement;
use crate::error::Result;
use crate::extractors::Json;
use crate::models::{CreateSubscription, CreateWebhookLog, SubscriptionPatch};

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    #[serde(rename = "signedPayload")]
    pub signed_payload: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Processed,
    /// The notification uuid was already recorded; nothing was reapplied.
    Duplicate,
    /// Envelope without transaction info: logged to stop redelivery, no
    /// subscription mutation.
    NoTransactionInfo,
}

pub async fn handle_apple_webhook(
    State(state): State<AppState>,
    Json(body): Json<WebhookRequest>,
) -> Result<Json<WebhookResponse>> {
    let notification = decode_notification(TrustVerifier::apple(), &body.signed_payload)?;

    let mut conn = state.db.get()?;
    let outcome = apply_notification(&mut conn, &notification)?;

    Ok(Json(WebhookResponse {
        success: true,
        duplicate: (outcome == IngestOutcome::Duplicate).then_some(true),
    }))
}

/// Apply one decoded notification exactly once.
///
/// Everything happens in a single database transaction that starts with the
/// dedup insert: a concurrent delivery of the same uuid loses the insert
/// and is reported as a duplicate without touching anything else.
pub fn apply_notification(
    conn: &mut Connection,
    notification: &Notification,
) -> Result<IngestOutcome> {
    let tx = conn.transaction()?;

    let original_transaction_id = notification
        .transaction_info
        .as_ref()
        .map(|t| t.original_transaction_id.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let log = CreateWebhookLog {
        notification_uuid: notification.notification_uuid.clone(),
        notification_type: notification.notification_type.clone(),
        subtype: notification.subtype.clone(),
        original_transaction_id,
        signed_date: notification.signed_date,
    };
    if !queries::try_record_webhook(&tx, &log)? {
        tracing::info!(
            notification_uuid = %notification.notification_uuid,
            "Duplicate webhook, skipping"
        );
        return Ok(IngestOutcome::Duplicate);
    }

    let Some(info) = &notification.transaction_info else {
        tracing::warn!(
            notification_type = %notification.notification_type,
            "Webhook missing transaction info"
        );
        tx.commit()?;
        return Ok(IngestOutcome::NoTransactionInfo);
    };

    let status = status_for_notification(
        &notification.notification_type,
        notification.subtype.as_deref(),
        Some(info),
    );
    let expires_at = info.expires_date.unwrap_or(0);
    let now_ms = queries::now_ms();
    let is_renewal = notification.notification_type == "DID_RENEW";

    // Resolve the user through the purchase-time correlation token; link an
    // orphaned or brand-new subscription, never steal a linked one.
    let user = match info.app_account_token.as_deref() {
        Some(token) => queries::find_user_by_app_account_token(&tx, token)?,
        None => None,
    };
    let existing = queries::get_subscription_by_original_transaction_id(
        &tx,
        &info.original_transaction_id,
    )?;
    let link_user_id = match (&existing, &user) {
        (Some(sub), Some(u)) if sub.is_orphaned => Some(u.id.clone()),
        (None, Some(u)) => Some(u.id.clone()),
        _ => None,
    };

    let auto_renew = notification
        .renewal_info
        .as_ref()
        .and_then(|r| r.auto_renew_enabled());

    let create = CreateSubscription {
        user_id: link_user_id.clone(),
        app_account_token: info.app_account_token.clone(),
        original_transaction_id: info.original_transaction_id.clone(),
        environment: info.environment.clone().unwrap_or_default(),
        product_id: info.product_id.clone(),
        subscription_group_id: info.subscription_group_identifier.clone(),
        status,
        auto_renew_enabled: auto_renew.unwrap_or(true),
        expires_at,
        last_renewal_at: is_renewal.then_some(now_ms),
    };
    let patch = SubscriptionPatch {
        user_id: link_user_id,
        status: Some(status),
        expires_at: Some(expires_at),
        auto_renew_enabled: auto_renew,
        last_renewal_at: is_renewal.then_some(now_ms),
        last_webhook_at: Some(now_ms),
        last_notification_uuid: Some(notification.notification_uuid.clone()),
    };
    let subscription = queries::upsert_subscription(&tx, &create, &patch)?;

    if let Some(user_id) = &subscription.user_id {
        match entitlement_action(&notification.notification_type) {
            EntitlementAction::Grant => {
                entitlement::grant(&tx, user_id, Some(expires_at))?;
            }
            EntitlementAction::Revoke => {
                entitlement::revoke(&tx, user_id)?;
            }
            EntitlementAction::RefreshExpiry => {
                entitlement::refresh_expiry(&tx, user_id, Some(expires_at))?;
            }
            EntitlementAction::None => {}
        }
    }

    tx.commit()?;

    tracing::info!(
        notification_type = %notification.notification_type,
        subtype = ?notification.subtype,
        original_transaction_id = %info.original_transaction_id,
        status = %status,
        "Processed App Store webhook"
    );

    Ok(IngestOutcome::Processed)
}
