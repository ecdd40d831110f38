//! Error handling for the Fire ID backend

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Cloud event store error (never propagated from the ingestion path)
    #[error("Store error: {0}")]
    Store(String),

    /// AI inference service error
    #[error("Inference error: {0}")]
    Inference(String),

    /// Evidence object store error
    #[error("Evidence error: {0}")]
    Evidence(String),

    /// Outbound notification channel error
    #[error("Notification error: {0}")]
    Notification(String),

    /// Config error (missing channel credentials, table name etc.)
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// SQLx database error (local buffer)
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Store(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_ERROR",
                msg.clone(),
            ),
            Error::Inference(msg) => (StatusCode::BAD_GATEWAY, "INFERENCE_ERROR", msg.clone()),
            Error::Evidence(msg) => (StatusCode::BAD_GATEWAY, "EVIDENCE_ERROR", msg.clone()),
            Error::Notification(msg) => (
                StatusCode::BAD_GATEWAY,
                "NOTIFICATION_ERROR",
                msg.clone(),
            ),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
            Error::Sqlx(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
