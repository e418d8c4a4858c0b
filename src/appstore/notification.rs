//! Decoded App Store payload models and the notification envelope decoder.
//!
//! A server notification is a verified JWS whose claims may embed up to two
//! further JWS payloads (`signedTransactionInfo`, `signedRenewalInfo`); each
//! is verified independently through the same trust root. A client-submitted
//! receipt is a single verified JWS with no envelope.

use serde::Deserialize;

use super::jws::{TrustVerifier, VerificationError};

/// Claims of a decoded `signedTransactionInfo` payload. Only the fields the
/// service reads; timestamps are Unix epoch milliseconds as Apple sends them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub original_transaction_id: String,
    pub transaction_id: Option<String>,
    pub product_id: String,
    pub subscription_group_identifier: Option<String>,
    /// Product type, e.g. "Auto-Renewable Subscription".
    #[serde(rename = "type")]
    pub transaction_type: Option<String>,
    pub environment: Option<String>,
    pub app_account_token: Option<String>,
    pub purchase_date: Option<i64>,
    pub expires_date: Option<i64>,
    pub revocation_date: Option<i64>,
}

impl TransactionInfo {
    pub fn is_auto_renewable(&self) -> bool {
        self.transaction_type.as_deref() == Some("Auto-Renewable Subscription")
    }
}

/// Claims of a decoded `signedRenewalInfo` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalInfo {
    /// 1 = auto-renew on, 0 = off.
    pub auto_renew_status: Option<i64>,
    pub auto_renew_product_id: Option<String>,
    pub original_transaction_id: Option<String>,
}

impl RenewalInfo {
    pub fn auto_renew_enabled(&self) -> Option<bool> {
        self.auto_renew_status.map(|s| s == 1)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationEnvelope {
    notification_type: String,
    subtype: Option<String>,
    #[serde(rename = "notificationUUID")]
    notification_uuid: String,
    signed_date: Option<i64>,
    data: Option<NotificationData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationData {
    signed_transaction_info: Option<String>,
    signed_renewal_info: Option<String>,
}

/// Normalized server notification with nested payloads already verified
/// and decoded.
#[derive(Debug)]
pub struct Notification {
    pub notification_type: String,
    pub subtype: Option<String>,
    pub notification_uuid: String,
    /// Envelope signing time, Unix epoch milliseconds.
    pub signed_date: Option<i64>,
    pub transaction_info: Option<TransactionInfo>,
    pub renewal_info: Option<RenewalInfo>,
}

/// Verify and unwrap a server notification envelope.
pub fn decode_notification(
    verifier: &TrustVerifier,
    signed_payload: &str,
) -> Result<Notification, VerificationError> {
    let envelope: NotificationEnvelope = verifier.verify(signed_payload)?;

    let (transaction_info, renewal_info) = match envelope.data {
        Some(data) => {
            let transaction = data
                .signed_transaction_info
                .as_deref()
                .map(|jws| verifier.verify::<TransactionInfo>(jws))
                .transpose()?;
            let renewal = data
                .signed_renewal_info
                .as_deref()
                .map(|jws| verifier.verify::<RenewalInfo>(jws))
                .transpose()?;
            (transaction, renewal)
        }
        None => (None, None),
    };

    Ok(Notification {
        notification_type: envelope.notification_type,
        subtype: envelope.subtype,
        notification_uuid: envelope.notification_uuid,
        signed_date: envelope.signed_date,
        transaction_info,
        renewal_info,
    })
}

/// Verify a client-submitted signed transaction (no envelope unwrapping).
pub fn decode_transaction(
    verifier: &TrustVerifier,
    signed_transaction: &str,
) -> Result<TransactionInfo, VerificationError> {
    verifier.verify(signed_transaction)
}
