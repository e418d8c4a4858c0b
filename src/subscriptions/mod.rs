pub mod reconciliation;
mod verify;
mod webhook;

pub use reconciliation::{
    apply_remote_state, run_reconciliation, ReconcileOutcome, ReconciliationReport,
};
pub use verify::{apply_verified_transaction, restore, verify, EntitlementResponse};
pub use webhook::{apply_notification, handle_apple_webhook, IngestOutcome, WebhookResponse};

use axum::{middleware, routing::post, Router};

use crate::db::AppState;
use crate::middleware::require_registered_user;
use crate::rate_limit;

pub fn router(state: AppState, rate_limit_rpm: u32) -> Router<AppState> {
    // Interactive endpoints do certificate-chain crypto per request; keep
    // them behind per-IP rate limiting.
    let interactive = Router::new()
        .route("/subscriptions/verify", post(verify))
        .route("/subscriptions/restore", post(restore))
        .layer(middleware::from_fn_with_state(state, require_registered_user))
        .layer(rate_limit::standard_layer(rate_limit_rpm));

    Router::new()
        .merge(interactive)
        // Apple calls this; the payload signature is the authentication.
        .route("/webhooks/apple-subscriptions", post(handle_apple_webhook))
        .route(
            "/admin/subscriptions/reconcile",
            post(reconciliation::trigger_reconciliation),
        )
}
