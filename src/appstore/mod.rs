//! App Store integration: JWS trust verification, notification decoding,
//! status mapping, and the server API client.

mod client;
mod jws;
mod notification;
mod status;

pub use client::{AppStoreClient, LastTransaction};
pub use jws::{TrustVerifier, VerificationError, APPLE_ROOT_CA_G3_FINGERPRINT};
pub use notification::{
    decode_notification, decode_transaction, Notification, RenewalInfo, TransactionInfo,
};
pub use status::{entitlement_action, status_for_notification, status_from_code, EntitlementAction};
