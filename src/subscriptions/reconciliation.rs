//! Pull-based reconciliation against the App Store Server API.
//!
//! Runs on an external trigger (cron hitting the admin route), never
//! self-scheduling. For every non-terminal subscription it compares the
//! platform's authoritative status and expiry to local state and corrects
//! drift through the same upsert and entitlement paths the webhook uses.
//! Per-item failures are counted and skipped; one bad subscription never
//! aborts the batch.

use std::time::Duration;

use axum::{extract::State, http::HeaderMap};
use rusqlite::Connection;
use serde::Serialize;

use crate::appstore::{decode_transaction, status_from_code, TrustVerifier};
use crate::db::{queries, AppState};
use crate::entitlement;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{CreateSubscription, Subscription, SubscriptionPatch, SubscriptionStatus};

/// Expiry disagreement below this is clock noise, not drift.
const EXPIRY_DRIFT_TOLERANCE_MS: i64 = 60_000;

/// Fixed delay between App Store API calls to respect rate limits.
const INTER_REQUEST_DELAY_MS: u64 = 100;

const WEBHOOK_LOG_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Default, Serialize)]
pub struct ReconciliationReport {
    pub synced: u64,
    pub errors: u64,
    #[serde(rename = "driftDetected")]
    pub drift_detected: u64,
    pub pruned: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Platform has no record; a 404 is not evidence of revocation.
    NotFoundUpstream,
    /// Platform response carried no transaction to compare against.
    NoData,
    /// Compared successfully; `drift` says whether a correction was applied.
    Compared { drift: bool },
}

/// Whether two expiry instants disagree beyond the tolerance.
pub fn has_expiry_drift(local_ms: i64, remote_ms: i64) -> bool {
    (local_ms - remote_ms).abs() > EXPIRY_DRIFT_TOLERANCE_MS
}

/// Run one reconciliation pass over all non-terminal subscriptions.
pub async fn run_reconciliation(state: &AppState) -> Result<ReconciliationReport> {
    tracing::info!("Starting subscription reconciliation");

    let subscriptions = {
        let conn = state.db.get()?;
        queries::subscriptions_for_reconciliation(&conn)?
    };
    tracing::info!(count = subscriptions.len(), "Fetched subscriptions for reconciliation");

    let mut report = ReconciliationReport::default();

    for subscription in &subscriptions {
        match reconcile_one(state, subscription).await {
            Ok(ReconcileOutcome::Compared { drift }) => {
                report.synced += 1;
                if drift {
                    report.drift_detected += 1;
                }
            }
            Ok(ReconcileOutcome::NotFoundUpstream | ReconcileOutcome::NoData) => {}
            Err(e) => {
                report.errors += 1;
                tracing::error!(
                    original_transaction_id = %subscription.original_transaction_id,
                    error = %e,
                    "Error reconciling subscription"
                );
            }
        }

        tokio::time::sleep(Duration::from_millis(INTER_REQUEST_DELAY_MS)).await;
    }

    {
        let conn = state.db.get()?;
        report.pruned = queries::prune_webhook_logs(&conn, WEBHOOK_LOG_RETENTION_DAYS)? as u64;
    }

    tracing::info!(
        synced = report.synced,
        errors = report.errors,
        drift_detected = report.drift_detected,
        pruned = report.pruned,
        "Subscription reconciliation complete"
    );

    Ok(report)
}

async fn reconcile_one(state: &AppState, subscription: &Subscription) -> Result<ReconcileOutcome> {
    let Some(last) = state
        .app_store
        .subscription_status(&subscription.original_transaction_id, &subscription.environment)
        .await?
    else {
        tracing::warn!(
            original_transaction_id = %subscription.original_transaction_id,
            "Subscription not found in App Store"
        );
        return Ok(ReconcileOutcome::NotFoundUpstream);
    };

    let remote_status = status_from_code(last.status);

    // The signed transaction info carries the authoritative expiry; keep the
    // local value if it is absent or fails to decode.
    let mut remote_expires = subscription.expires_at;
    if let Some(jws) = &last.signed_transaction_info {
        match decode_transaction(TrustVerifier::apple(), jws) {
            Ok(info) => {
                if let Some(expires) = info.expires_date {
                    remote_expires = expires;
                }
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Failed to decode transaction info during reconciliation"
                );
            }
        }
    }

    let conn = state.db.get()?;
    apply_remote_state(&conn, subscription, remote_status, remote_expires)
}

/// Compare local state to the platform's and correct any drift through the
/// shared upsert and the entitlement granter.
pub fn apply_remote_state(
    conn: &Connection,
    subscription: &Subscription,
    remote_status: SubscriptionStatus,
    remote_expires: i64,
) -> Result<ReconcileOutcome> {
    let status_drift = subscription.status != remote_status;
    let expiry_drift = has_expiry_drift(subscription.expires_at, remote_expires);
    if !status_drift && !expiry_drift {
        return Ok(ReconcileOutcome::Compared { drift: false });
    }

    tracing::info!(
        original_transaction_id = %subscription.original_transaction_id,
        local_status = %subscription.status,
        remote_status = %remote_status,
        local_expires = subscription.expires_at,
        remote_expires,
        "Drift detected, updating subscription"
    );

    let create = CreateSubscription {
        user_id: subscription.user_id.clone(),
        app_account_token: subscription.app_account_token.clone(),
        original_transaction_id: subscription.original_transaction_id.clone(),
        environment: subscription.environment.clone(),
        product_id: subscription.product_id.clone(),
        subscription_group_id: subscription.subscription_group_id.clone(),
        status: remote_status,
        auto_renew_enabled: subscription.auto_renew_enabled,
        expires_at: remote_expires,
        last_renewal_at: subscription.last_renewal_at,
    };
    let patch = SubscriptionPatch {
        status: Some(remote_status),
        expires_at: Some(remote_expires),
        ..Default::default()
    };
    queries::upsert_subscription(conn, &create, &patch)?;

    // Reconciliation has no notification type; the entitlement transition is
    // derived from whether the status is entitled before vs. after.
    if let Some(user_id) = &subscription.user_id {
        let was_entitled = subscription.status.is_entitled();
        let is_entitled = remote_status.is_entitled();

        if is_entitled && !was_entitled {
            entitlement::grant(conn, user_id, Some(remote_expires))?;
            tracing::info!(user_id, "Reactivated premium via reconciliation");
        } else if !is_entitled && was_entitled {
            entitlement::revoke(conn, user_id)?;
            tracing::info!(user_id, "Revoked premium via reconciliation");
        } else if is_entitled {
            entitlement::refresh_expiry(conn, user_id, Some(remote_expires))?;
        }
    }

    Ok(ReconcileOutcome::Compared { drift: true })
}

/// POST /admin/subscriptions/reconcile. Static API key gate; runs one pass
/// synchronously.
pub async fn trigger_reconciliation(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ReconciliationReport>> {
    let expected = state.admin_api_key.as_deref().ok_or(AppError::Unauthorized)?;
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        return Err(AppError::Unauthorized);
    }

    let report = run_reconciliation(&state).await?;
    Ok(Json(report))
}
