//! Interactive receipt verification: first purchase (`verify`) and
//! restore-purchases (`restore`). Both require an authenticated, non-guest
//! user and converge on the same shared upsert and entitlement granter the
//! webhook and reconciliation paths use.

use axum::{extract::State, Extension};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::appstore::{decode_transaction, TransactionInfo, TrustVerifier};
use crate::db::{queries, AppState};
use crate::entitlement;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::jwt::{issue_tokens, IssuedTokens};
use crate::middleware::CurrentUser;
use crate::models::{
    CreateSubscription, Subscription, SubscriptionPatch, SubscriptionStatus, Tier, User,
};

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(rename = "signedTransaction")]
    pub signed_transaction: String,
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    #[serde(rename = "signedTransaction")]
    pub signed_transaction: Option<String>,
    #[serde(rename = "originalTransactionId")]
    pub original_transaction_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionSummary {
    #[serde(rename = "productId")]
    pub product_id: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
    pub status: SubscriptionStatus,
}

#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    #[serde(flatten)]
    pub tokens: IssuedTokens,
    pub tier: Tier,
    #[serde(rename = "subscriptionValidUntil")]
    pub subscription_valid_until: Option<i64>,
    pub subscription: SubscriptionSummary,
}

/// POST /subscriptions/verify
pub async fn verify(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<EntitlementResponse>> {
    let info = decode_transaction(TrustVerifier::apple(), &body.signed_transaction)?;

    let conn = state.db.get()?;
    let subscription =
        apply_verified_transaction(&conn, &state.expected_environment, &user, &info)?;

    let outcome = entitlement::grant(&conn, &user.id, Some(subscription.expires_at))?;
    respond(&conn, &state, outcome.user, subscription)
}

/// POST /subscriptions/restore
pub async fn restore(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<RestoreRequest>,
) -> Result<Json<EntitlementResponse>> {
    let conn = state.db.get()?;

    let subscription = match (&body.signed_transaction, &body.original_transaction_id) {
        (Some(signed), _) => {
            let info = decode_transaction(TrustVerifier::apple(), signed)?;
            apply_verified_transaction(&conn, &state.expected_environment, &user, &info)?
        }
        // Bare id: only a transaction already known to the store can be
        // reattached; creation always required a verified receipt, so
        // nothing can be forged this way.
        (None, Some(original_transaction_id)) => {
            restore_known_subscription(&conn, &user, original_transaction_id)?
        }
        (None, None) => {
            return Err(AppError::BadRequest(
                "Either signedTransaction or originalTransactionId is required".into(),
            ))
        }
    };

    let now_ms = queries::now_ms();
    let current_user = if subscription.is_currently_valid(now_ms) {
        entitlement::grant(&conn, &user.id, Some(subscription.expires_at))?.user
    } else {
        queries::get_user_by_id(&conn, &user.id)?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?
    };

    respond(&conn, &state, current_user, subscription)
}

/// Validate a decoded transaction against the current user and upsert the
/// subscription. Used by `verify` and the signed-transaction arm of
/// `restore`.
pub fn apply_verified_transaction(
    conn: &Connection,
    expected_environment: &str,
    user: &User,
    info: &TransactionInfo,
) -> Result<Subscription> {
    if !info.is_auto_renewable() {
        return Err(AppError::BadRequest("Transaction is not a subscription".into()));
    }

    let environment = info.environment.as_deref().unwrap_or("");
    if environment != expected_environment {
        tracing::warn!(
            expected = expected_environment,
            received = environment,
            "Environment mismatch"
        );
        return Err(AppError::BadRequest("Environment mismatch".into()));
    }

    let expires_at = info
        .expires_date
        .ok_or_else(|| AppError::BadRequest("Transaction has no expiration".into()))?;
    if expires_at < queries::now_ms() {
        return Err(AppError::BadRequest("Subscription is expired".into()));
    }

    // A receipt tagged with another account's correlation token cannot be
    // attached here, even before the ownership check on the stored row.
    if let Some(token) = info.app_account_token.as_deref() {
        if user.app_account_token.as_deref() != Some(token) {
            return Err(AppError::AccountMismatch(format!(
                "transaction {} was purchased under a different account token",
                info.original_transaction_id
            )));
        }
    }

    let now_ms = queries::now_ms();
    let create = CreateSubscription {
        user_id: Some(user.id.clone()),
        app_account_token: info
            .app_account_token
            .clone()
            .or_else(|| user.app_account_token.clone()),
        original_transaction_id: info.original_transaction_id.clone(),
        environment: environment.to_string(),
        product_id: info.product_id.clone(),
        subscription_group_id: info.subscription_group_identifier.clone(),
        status: SubscriptionStatus::Active,
        auto_renew_enabled: true,
        expires_at,
        last_renewal_at: Some(now_ms),
    };
    let patch = SubscriptionPatch {
        user_id: Some(user.id.clone()),
        status: Some(SubscriptionStatus::Active),
        expires_at: Some(expires_at),
        last_renewal_at: Some(now_ms),
        ..Default::default()
    };

    // The shared upsert rejects a transaction already linked to a different
    // user with a conflict, never a silent ownership overwrite.
    queries::upsert_subscription(conn, &create, &patch)
}

/// Restore by bare original transaction id: reattach an orphaned
/// subscription or confirm ownership of an already-linked one.
fn restore_known_subscription(
    conn: &Connection,
    user: &User,
    original_transaction_id: &str,
) -> Result<Subscription> {
    let subscription =
        queries::get_subscription_by_original_transaction_id(conn, original_transaction_id)?
            .ok_or_else(|| {
                AppError::NotFound(
                    "Subscription not found. Please provide signedTransaction.".into(),
                )
            })?;

    match &subscription.user_id {
        Some(owner) if owner != &user.id => Err(AppError::SubscriptionConflict(format!(
            "transaction {original_transaction_id} is linked to another account"
        ))),
        Some(_) => Ok(subscription),
        None => queries::link_subscription_to_user(conn, original_transaction_id, &user.id)?
            .ok_or_else(|| AppError::Internal("Subscription vanished during link".into())),
    }
}

fn respond(
    conn: &Connection,
    state: &AppState,
    user: User,
    subscription: Subscription,
) -> Result<Json<EntitlementResponse>> {
    let tokens = issue_tokens(conn, &state.token_keys, &user)?;
    Ok(Json(EntitlementResponse {
        tokens,
        tier: user.tier,
        subscription_valid_until: user.subscription_valid_until,
        subscription: SubscriptionSummary {
            product_id: subscription.product_id.clone(),
            expires_at: subscription.expires_at,
            status: subscription.status,
        },
    }))
}
