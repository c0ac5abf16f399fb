use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::billing::error::BillingError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Tier not authorized: {0}")]
    TierNotAuthorized(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Upstream error: {message}")]
    Upstream { message: String, retryable: bool },

    #[error("Storage error: {message}")]
    Storage { message: String, retryable: bool },
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::MissingEmail | BillingError::MissingPlanType => {
                AppError::Validation(err.to_string())
            }
            BillingError::Validation(msg) => AppError::Validation(msg),
            BillingError::UnknownPlan(_) => AppError::UnknownPlan(err.to_string()),
            BillingError::UserNotFound(_) => AppError::NotFound(err.to_string()),
            BillingError::InvalidSignature(msg) => AppError::InvalidSignature(msg),
            BillingError::InvalidCredential => AppError::Unauthorized,
            BillingError::TierNotAuthorized(_) => AppError::TierNotAuthorized(err.to_string()),
            BillingError::ProviderUnavailable(msg) => AppError::ServiceUnavailable(msg),
            BillingError::ProviderRequestFailed { reason, retryable } => AppError::Upstream {
                message: reason,
                retryable,
            },
            BillingError::Store(_) => AppError::Storage {
                retryable: err.is_retryable(),
                message: err.to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::UnknownPlan(msg) => (StatusCode::BAD_REQUEST, "UNKNOWN_PLAN", msg.clone()),
            AppError::InvalidSignature(msg) => {
                tracing::warn!("Rejected webhook: {msg}");
                (
                    StatusCode::BAD_REQUEST,
                    "INVALID_SIGNATURE",
                    "Webhook signature verification failed".to_string(),
                )
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Access denied".to_string(),
            ),
            AppError::TierNotAuthorized(msg) => {
                (StatusCode::FORBIDDEN, "TIER_NOT_AUTHORIZED", msg.clone())
            }
            AppError::ServiceUnavailable(msg) => {
                tracing::error!("Service unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "PROVIDER_UNAVAILABLE",
                    msg.clone(),
                )
            }
            AppError::Upstream { message, retryable } => {
                tracing::error!("Payment provider error (retryable={retryable}): {message}");
                (
                    StatusCode::BAD_GATEWAY,
                    "PROVIDER_REQUEST_FAILED",
                    if *retryable {
                        "Payment provider request failed; retrying is safe".to_string()
                    } else {
                        "Payment provider rejected the request; do not retry".to_string()
                    },
                )
            }
            AppError::Storage { message, retryable } => {
                tracing::error!("Storage error (retryable={retryable}): {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    if *retryable {
                        "Temporary storage failure; retrying is safe".to_string()
                    } else {
                        "A storage error occurred; do not retry".to_string()
                    },
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
