//! Tests for App Store webhook ingestion.
//!
//! The ingest logic is driven directly with decoded notifications (the JWS
//! layer has its own unit tests); router-level tests cover the transport
//! contract for malformed payloads.

use axum::{body::Body, http::Request};
use serde_json::Value;
use tower::ServiceExt;

use timbre::subscriptions::{apply_notification, IngestOutcome};

mod common;
use common::*;

#[test]
fn subscribed_webhook_creates_subscription_and_grants_premium() {
    let state = create_test_app_state();
    let mut conn = state.db.get().unwrap();

    let user = create_test_user(&conn, "singer@example.com", Some("token-1"));
    assert_eq!(user.tier, Tier::Free);
    assert_eq!(user.entitlement_version, 1);

    let expires = future_ms(30);
    let note = notification(
        "SUBSCRIBED",
        "uuid-1",
        Some(transaction_info("1000000000000001", Some("token-1"), expires)),
    );

    let outcome = apply_notification(&mut conn, &note).unwrap();
    assert_eq!(outcome, IngestOutcome::Processed);

    let subscription = get_subscription(&conn, "1000000000000001");
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert!(!subscription.is_orphaned);
    assert_eq!(subscription.user_id.as_deref(), Some(user.id.as_str()));
    assert_eq!(subscription.expires_at, expires);
    assert_eq!(subscription.last_notification_uuid.as_deref(), Some("uuid-1"));

    let user = get_user(&conn, &user.id);
    assert_eq!(user.tier, Tier::Premium);
    assert_eq!(user.subscription_valid_until, Some(expires));
    assert_eq!(user.entitlement_version, 2);
}

#[test]
fn duplicate_notification_uuid_is_not_reprocessed() {
    let state = create_test_app_state();
    let mut conn = state.db.get().unwrap();

    let user = create_test_user(&conn, "singer@example.com", Some("token-1"));
    let note = notification(
        "SUBSCRIBED",
        "uuid-dup",
        Some(transaction_info("1000000000000001", Some("token-1"), future_ms(30))),
    );

    assert_eq!(apply_notification(&mut conn, &note).unwrap(), IngestOutcome::Processed);
    let ent_v_after_first = get_user(&conn, &user.id).entitlement_version;

    assert_eq!(apply_notification(&mut conn, &note).unwrap(), IngestOutcome::Duplicate);

    // Exactly one log row and no second entitlement mutation.
    assert_eq!(count_webhook_logs(&conn), 1);
    assert_eq!(get_user(&conn, &user.id).entitlement_version, ent_v_after_first);
}

#[test]
fn did_renew_extends_expiry_without_bumping_entitlement_version() {
    let state = create_test_app_state();
    let mut conn = state.db.get().unwrap();

    let user = create_test_user(&conn, "singer@example.com", Some("token-1"));

    let first_expiry = future_ms(30);
    let note = notification(
        "SUBSCRIBED",
        "uuid-1",
        Some(transaction_info("1000000000000001", Some("token-1"), first_expiry)),
    );
    apply_notification(&mut conn, &note).unwrap();
    assert_eq!(get_user(&conn, &user.id).entitlement_version, 2);

    let renewed_expiry = future_ms(60);
    let renew = notification(
        "DID_RENEW",
        "uuid-2",
        Some(transaction_info("1000000000000001", Some("token-1"), renewed_expiry)),
    );
    apply_notification(&mut conn, &renew).unwrap();

    let user = get_user(&conn, &user.id);
    // Still premium, new expiry, tokens stay valid: no entV bump.
    assert_eq!(user.tier, Tier::Premium);
    assert_eq!(user.subscription_valid_until, Some(renewed_expiry));
    assert_eq!(user.entitlement_version, 2);

    let subscription = get_subscription(&conn, "1000000000000001");
    assert_eq!(subscription.expires_at, renewed_expiry);
    assert!(subscription.last_renewal_at.is_some());
}

#[test]
fn expired_webhook_revokes_premium() {
    let state = create_test_app_state();
    let mut conn = state.db.get().unwrap();

    let user = create_test_user(&conn, "singer@example.com", Some("token-1"));
    apply_notification(
        &mut conn,
        &notification(
            "SUBSCRIBED",
            "uuid-1",
            Some(transaction_info("1000000000000001", Some("token-1"), future_ms(30))),
        ),
    )
    .unwrap();

    apply_notification(
        &mut conn,
        &notification(
            "EXPIRED",
            "uuid-2",
            Some(transaction_info("1000000000000001", Some("token-1"), past_ms(1))),
        ),
    )
    .unwrap();

    let user = get_user(&conn, &user.id);
    assert_eq!(user.tier, Tier::Free);
    assert_eq!(user.subscription_valid_until, None);
    assert_eq!(user.entitlement_version, 3);

    assert_eq!(
        get_subscription(&conn, "1000000000000001").status,
        SubscriptionStatus::Expired
    );
}

#[test]
fn refund_webhook_revokes_and_marks_revoked() {
    let state = create_test_app_state();
    let mut conn = state.db.get().unwrap();

    let user = create_test_user(&conn, "singer@example.com", Some("token-1"));
    apply_notification(
        &mut conn,
        &notification(
            "SUBSCRIBED",
            "uuid-1",
            Some(transaction_info("1000000000000001", Some("token-1"), future_ms(30))),
        ),
    )
    .unwrap();

    apply_notification(
        &mut conn,
        &notification(
            "REFUND",
            "uuid-2",
            Some(transaction_info("1000000000000001", Some("token-1"), future_ms(30))),
        ),
    )
    .unwrap();

    assert_eq!(get_user(&conn, &user.id).tier, Tier::Free);
    assert_eq!(
        get_subscription(&conn, "1000000000000001").status,
        SubscriptionStatus::Revoked
    );
}

#[test]
fn envelope_without_transaction_info_is_logged_and_acknowledged() {
    let state = create_test_app_state();
    let mut conn = state.db.get().unwrap();

    let note = notification("TEST", "uuid-empty", None);
    assert_eq!(
        apply_notification(&mut conn, &note).unwrap(),
        IngestOutcome::NoTransactionInfo
    );

    // Logged under the placeholder id so redelivery dedups.
    let log = queries::get_webhook_log(&conn, "uuid-empty").unwrap().unwrap();
    assert_eq!(log.original_transaction_id, "unknown");

    assert_eq!(
        apply_notification(&mut conn, &note).unwrap(),
        IngestOutcome::Duplicate
    );
}

#[test]
fn unresolvable_app_account_token_creates_orphaned_subscription() {
    let state = create_test_app_state();
    let mut conn = state.db.get().unwrap();

    let note = notification(
        "SUBSCRIBED",
        "uuid-1",
        Some(transaction_info("1000000000000001", Some("unknown-token"), future_ms(30))),
    );
    apply_notification(&mut conn, &note).unwrap();

    let subscription = get_subscription(&conn, "1000000000000001");
    assert!(subscription.is_orphaned);
    assert!(subscription.user_id.is_none());
    assert_eq!(subscription.status, SubscriptionStatus::Active);
}

#[test]
fn orphaned_subscription_is_linked_once_token_resolves() {
    let state = create_test_app_state();
    let mut conn = state.db.get().unwrap();

    // Purchase arrives before the account exists.
    apply_notification(
        &mut conn,
        &notification(
            "SUBSCRIBED",
            "uuid-1",
            Some(transaction_info("1000000000000001", Some("token-1"), future_ms(30))),
        ),
    )
    .unwrap();
    assert!(get_subscription(&conn, "1000000000000001").is_orphaned);

    let user = create_test_user(&conn, "late@example.com", Some("token-1"));

    apply_notification(
        &mut conn,
        &notification(
            "DID_RENEW",
            "uuid-2",
            Some(transaction_info("1000000000000001", Some("token-1"), future_ms(60))),
        ),
    )
    .unwrap();

    let subscription = get_subscription(&conn, "1000000000000001");
    assert!(!subscription.is_orphaned);
    assert_eq!(subscription.user_id.as_deref(), Some(user.id.as_str()));
}

#[tokio::test]
async fn webhook_endpoint_rejects_unverifiable_payload() {
    let app = webhook_app(create_test_app_state());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/apple-subscriptions")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({ "signedPayload": "not.a.jws" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Invalid signed payload");
}

#[tokio::test]
async fn webhook_endpoint_rejects_missing_field() {
    let app = webhook_app(create_test_app_state());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/apple-subscriptions")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
}
