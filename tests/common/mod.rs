//! Test utilities and fixtures for Timbre integration tests

#![allow(dead_code)]

use axum::routing::post;
use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::sync::Arc;

pub use timbre::appstore::{AppStoreClient, Notification, RenewalInfo, TransactionInfo};
pub use timbre::config::AppStoreCredentials;
pub use timbre::db::{init_db, queries, AppState};
pub use timbre::jwt::{sign_access_token, TokenKeys};
pub use timbre::middleware::require_registered_user;
pub use timbre::models::*;
pub use timbre::subscriptions::{handle_apple_webhook, restore, verify};

/// Create an AppState for testing with an in-memory database.
///
/// The pool is capped at one connection so every pooled checkout sees the
/// same in-memory database.
pub fn create_test_app_state() -> AppState {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    AppState {
        db: pool,
        app_store: Arc::new(AppStoreClient::new(AppStoreCredentials {
            issuer_id: "test-issuer".to_string(),
            key_id: "test-key".to_string(),
            private_key: String::new(),
            bundle_id: "com.example.timbre".to_string(),
        })),
        expected_environment: "Production".to_string(),
        admin_api_key: Some("test-admin-key".to_string()),
        token_keys: TokenKeys::from_secret("test-secret-key"),
    }
}

/// Router with the webhook endpoint only (no rate limiting for tests).
pub fn webhook_app(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/apple-subscriptions", post(handle_apple_webhook))
        .with_state(state)
}

/// Router with the authenticated verify/restore endpoints (no rate limiting
/// for tests).
pub fn subscriptions_app(state: AppState) -> Router {
    Router::new()
        .route("/subscriptions/verify", post(verify))
        .route("/subscriptions/restore", post(restore))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_registered_user,
        ))
        .with_state(state)
}

pub fn create_test_user(
    conn: &Connection,
    email: &str,
    app_account_token: Option<&str>,
) -> User {
    queries::create_user(
        conn,
        &CreateUser {
            email: Some(email.to_string()),
            is_guest: false,
            app_account_token: app_account_token.map(String::from),
        },
    )
    .expect("Failed to create test user")
}

pub fn create_guest_user(conn: &Connection) -> User {
    queries::create_user(
        conn,
        &CreateUser {
            email: None,
            is_guest: true,
            app_account_token: None,
        },
    )
    .expect("Failed to create test guest")
}

/// A transaction info fixture as decoded from a signed payload.
pub fn transaction_info(
    original_transaction_id: &str,
    app_account_token: Option<&str>,
    expires_at_ms: i64,
) -> TransactionInfo {
    serde_json::from_value(serde_json::json!({
        "originalTransactionId": original_transaction_id,
        "transactionId": "2000000000000001",
        "productId": "premium_monthly",
        "subscriptionGroupIdentifier": "21000001",
        "type": "Auto-Renewable Subscription",
        "environment": "Production",
        "appAccountToken": app_account_token,
        "expiresDate": expires_at_ms,
    }))
    .expect("valid transaction info fixture")
}

/// A notification fixture as produced by the decoder.
pub fn notification(
    notification_type: &str,
    notification_uuid: &str,
    transaction: Option<TransactionInfo>,
) -> Notification {
    Notification {
        notification_type: notification_type.to_string(),
        subtype: None,
        notification_uuid: notification_uuid.to_string(),
        signed_date: Some(queries::now_ms()),
        transaction_info: transaction,
        renewal_info: None,
    }
}

/// Unix epoch milliseconds `days` in the future.
pub fn future_ms(days: i64) -> i64 {
    queries::now_ms() + days * 86_400_000
}

/// Unix epoch milliseconds `days` in the past.
pub fn past_ms(days: i64) -> i64 {
    queries::now_ms() - days * 86_400_000
}

pub fn get_user(conn: &Connection, id: &str) -> User {
    queries::get_user_by_id(conn, id).unwrap().expect("user exists")
}

pub fn get_subscription(conn: &Connection, original_transaction_id: &str) -> Subscription {
    queries::get_subscription_by_original_transaction_id(conn, original_transaction_id)
        .unwrap()
        .expect("subscription exists")
}

pub fn count_webhook_logs(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM webhook_log", [], |row| row.get(0))
        .unwrap()
}

/// Bearer header value for an access token issued to the user.
pub fn bearer_for(state: &AppState, user: &User) -> String {
    let token = sign_access_token(&state.token_keys, user).unwrap();
    format!("Bearer {token}")
}
