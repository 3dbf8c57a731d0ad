use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::matching::MatchError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error("Delivery queue error: {0}")]
    Queue(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            AppError::Auth(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Queue(_) => (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            // A match conflict must tell the client which side to refresh.
            AppError::Match(e) => match e {
                MatchError::OfferNotFound(_) => (StatusCode::NOT_FOUND, "OFFER_NOT_FOUND"),
                MatchError::RequestNotFound(_) => (StatusCode::NOT_FOUND, "REQUEST_NOT_FOUND"),
                MatchError::OfferAlreadyMatched(_) => {
                    (StatusCode::CONFLICT, "OFFER_ALREADY_MATCHED")
                }
                MatchError::RequestAlreadyMatched(_) => {
                    (StatusCode::CONFLICT, "REQUEST_ALREADY_MATCHED")
                }
                MatchError::OfferUnavailable { .. } => (StatusCode::CONFLICT, "OFFER_UNAVAILABLE"),
                MatchError::RequestUnavailable { .. } => {
                    (StatusCode::CONFLICT, "REQUEST_UNAVAILABLE")
                }
                MatchError::Conflict => (StatusCode::CONFLICT, "MATCH_CONFLICT"),
                MatchError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let log_message = self.to_string();

        // Internal details are masked in production; conflict and validation
        // messages are client-facing by design.
        let client_message = if status.is_server_error() && is_production() {
            "Internal server error".to_string()
        } else {
            log_message.clone()
        };

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
