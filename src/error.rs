use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::appstore::VerificationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Verification failed: {0}")]
    Verification(#[from] VerificationError),

    /// Receipt carries an appAccountToken belonging to a different account.
    #[error("Account mismatch: {0}")]
    AccountMismatch(String),

    /// Subscription already linked to a different user.
    #[error("Subscription conflict: {0}")]
    SubscriptionConflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    /// Machine-readable reason for business-rule rejections
    /// (e.g. "account_mismatch"), consumed by the mobile client.
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details, reason) = match &self {
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, "Not found", Some(msg.clone()), None)
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone()), None)
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None, None),
            AppError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, "Forbidden", Some(msg.clone()), None)
            }
            AppError::Verification(e) => {
                tracing::warn!("Payload verification failed: {}", e);
                (
                    StatusCode::BAD_REQUEST,
                    "Invalid signed payload",
                    Some(e.to_string()),
                    None,
                )
            }
            AppError::AccountMismatch(msg) => (
                StatusCode::FORBIDDEN,
                "Transaction belongs to different account",
                Some(msg.clone()),
                Some("account_mismatch"),
            ),
            AppError::SubscriptionConflict(msg) => (
                StatusCode::CONFLICT,
                "Subscription belongs to different user",
                Some(msg.clone()),
                Some("subscription_conflict"),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None, None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None, None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()), None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None, None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
            reason,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
