//! Status mapping from App Store notifications and status codes.
//!
//! Two inputs arrive for the same underlying platform state: notification
//! types (push path) and numeric status codes (reconciliation path). Both
//! map onto [`SubscriptionStatus`] so the webhook ingestor and the
//! reconciliation loop can never disagree on the enum itself.

use crate::models::SubscriptionStatus;

use super::notification::TransactionInfo;

/// What a notification means for the user's entitlement, independent of the
/// subscription status it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitlementAction {
    /// Raise the user to premium.
    Grant,
    /// Drop the user to free.
    Revoke,
    /// Extend the entitlement expiry without a tier change (no entV bump).
    RefreshExpiry,
    /// No entitlement change at all.
    None,
}

/// Map a notification to the subscription status it implies.
pub fn status_for_notification(
    notification_type: &str,
    _subtype: Option<&str>,
    transaction: Option<&TransactionInfo>,
) -> SubscriptionStatus {
    match notification_type {
        "SUBSCRIBED" | "OFFER_REDEEMED" | "DID_RENEW" | "RENEWAL_EXTENDED" => {
            SubscriptionStatus::Active
        }
        "DID_FAIL_TO_RENEW" => SubscriptionStatus::BillingRetry,
        "GRACE_PERIOD_EXPIRED" | "EXPIRED" => SubscriptionStatus::Expired,
        "REFUND" | "REVOKE" => SubscriptionStatus::Revoked,
        _ => {
            // Unknown types carry no status semantics of their own; fall back
            // to the transaction's revocation marker.
            if transaction.is_some_and(|t| t.revocation_date.is_some()) {
                SubscriptionStatus::Revoked
            } else {
                SubscriptionStatus::Active
            }
        }
    }
}

/// Classify a notification's effect on the user's entitlement.
pub fn entitlement_action(notification_type: &str) -> EntitlementAction {
    match notification_type {
        "SUBSCRIBED" | "OFFER_REDEEMED" => EntitlementAction::Grant,
        "GRACE_PERIOD_EXPIRED" | "EXPIRED" | "REFUND" | "REVOKE" => EntitlementAction::Revoke,
        "DID_RENEW" | "RENEWAL_EXTENDED" => EntitlementAction::RefreshExpiry,
        _ => EntitlementAction::None,
    }
}

/// Map an App Store Server API status code to the internal status.
///
/// 1 = active, 2 = expired, 3 = billing retry, 4 = grace period,
/// 5 = revoked. Anything else is treated as expired.
pub fn status_from_code(code: i64) -> SubscriptionStatus {
    match code {
        1 => SubscriptionStatus::Active,
        2 => SubscriptionStatus::Expired,
        3 => SubscriptionStatus::BillingRetry,
        4 => SubscriptionStatus::GracePeriod,
        5 => SubscriptionStatus::Revoked,
        _ => SubscriptionStatus::Expired,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction(revocation_date: Option<i64>) -> TransactionInfo {
        TransactionInfo {
            original_transaction_id: "1000000000000001".into(),
            transaction_id: None,
            product_id: "premium_monthly".into(),
            subscription_group_identifier: None,
            transaction_type: Some("Auto-Renewable Subscription".into()),
            environment: Some("Production".into()),
            app_account_token: None,
            purchase_date: None,
            expires_date: Some(1_900_000_000_000),
            revocation_date,
        }
    }

    #[test]
    fn maps_every_known_notification_type() {
        let cases = [
            ("SUBSCRIBED", SubscriptionStatus::Active),
            ("OFFER_REDEEMED", SubscriptionStatus::Active),
            ("DID_RENEW", SubscriptionStatus::Active),
            ("RENEWAL_EXTENDED", SubscriptionStatus::Active),
            ("DID_FAIL_TO_RENEW", SubscriptionStatus::BillingRetry),
            ("GRACE_PERIOD_EXPIRED", SubscriptionStatus::Expired),
            ("EXPIRED", SubscriptionStatus::Expired),
            ("REFUND", SubscriptionStatus::Revoked),
            ("REVOKE", SubscriptionStatus::Revoked),
        ];
        for (kind, expected) in cases {
            assert_eq!(
                status_for_notification(kind, None, Some(&transaction(None))),
                expected,
                "notification type {kind}"
            );
        }
    }

    #[test]
    fn unknown_type_defaults_to_active_unless_revoked() {
        assert_eq!(
            status_for_notification("PRICE_INCREASE", None, Some(&transaction(None))),
            SubscriptionStatus::Active
        );
        assert_eq!(
            status_for_notification("PRICE_INCREASE", None, None),
            SubscriptionStatus::Active
        );
        assert_eq!(
            status_for_notification(
                "PRICE_INCREASE",
                None,
                Some(&transaction(Some(1_800_000_000_000)))
            ),
            SubscriptionStatus::Revoked
        );
    }

    #[test]
    fn classifies_entitlement_actions() {
        assert_eq!(entitlement_action("SUBSCRIBED"), EntitlementAction::Grant);
        assert_eq!(entitlement_action("OFFER_REDEEMED"), EntitlementAction::Grant);
        assert_eq!(entitlement_action("EXPIRED"), EntitlementAction::Revoke);
        assert_eq!(entitlement_action("GRACE_PERIOD_EXPIRED"), EntitlementAction::Revoke);
        assert_eq!(entitlement_action("REFUND"), EntitlementAction::Revoke);
        assert_eq!(entitlement_action("REVOKE"), EntitlementAction::Revoke);
        assert_eq!(entitlement_action("DID_RENEW"), EntitlementAction::RefreshExpiry);
        assert_eq!(entitlement_action("RENEWAL_EXTENDED"), EntitlementAction::RefreshExpiry);
        assert_eq!(entitlement_action("DID_FAIL_TO_RENEW"), EntitlementAction::None);
        assert_eq!(entitlement_action("DID_CHANGE_RENEWAL_STATUS"), EntitlementAction::None);
        assert_eq!(entitlement_action("PRICE_INCREASE"), EntitlementAction::None);
    }

    #[test]
    fn maps_status_codes() {
        assert_eq!(status_from_code(1), SubscriptionStatus::Active);
        assert_eq!(status_from_code(2), SubscriptionStatus::Expired);
        assert_eq!(status_from_code(3), SubscriptionStatus::BillingRetry);
        assert_eq!(status_from_code(4), SubscriptionStatus::GracePeriod);
        assert_eq!(status_from_code(5), SubscriptionStatus::Revoked);
        assert_eq!(status_from_code(0), SubscriptionStatus::Expired);
        assert_eq!(status_from_code(99), SubscriptionStatus::Expired);
    }

    /// The code table and the notification-type table describe the same
    /// platform states; they must agree wherever both have an opinion.
    #[test]
    fn code_and_notification_tables_agree() {
        let pairs = [
            ("SUBSCRIBED", 1),
            ("DID_RENEW", 1),
            ("EXPIRED", 2),
            ("GRACE_PERIOD_EXPIRED", 2),
            ("DID_FAIL_TO_RENEW", 3),
            ("REVOKE", 5),
            ("REFUND", 5),
        ];
        for (kind, code) in pairs {
            assert_eq!(
                status_for_notification(kind, None, None),
                status_from_code(code),
                "{kind} vs code {code}"
            );
        }
    }
}
