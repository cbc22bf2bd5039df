use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Storage Errors
///
/// Failures of the API key store are kept in their own variant so callers can
/// tell infrastructure trouble (503) apart from client mistakes (4xx).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Key store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Reasons an API key authentication attempt can fail.
///
/// The four credential variants are distinguishable here so they can be
/// logged, but the HTTP layer answers all of them with the same 401 body.
/// [`AuthError::Store`] is an infrastructure failure, not a credential one.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no API key credential supplied")]
    MissingCredential,

    #[error("API key not recognised")]
    InvalidCredential,

    #[error("API key is disabled")]
    Disabled,

    #[error("API key has expired")]
    Expired,

    #[error("key store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::InvalidCredential => "invalid_credential",
            AuthError::Disabled => "disabled",
            AuthError::Expired => "expired",
            AuthError::Store(_) => "store_error",
        }
    }

    /// True for the expected, client-caused failure kinds.
    pub fn is_credential_failure(&self) -> bool {
        !matches!(self, AuthError::Store(_))
    }
}

/// Error response body for API endpoints.
#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) details: Option<String>,
}

impl ErrorResponse {
    pub(crate) fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            details: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        tracing::error!(error = %self, "Request failed");

        let (status, error_type, message) = match &self {
            // Never leak storage details
            AppError::Store(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "Key storage is temporarily unavailable. Please try again later.",
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred. Please contact support if the issue persists.",
            ),
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Service configuration error. Please contact support.",
            ),

            // Client errors - safe to show the message as it's user-facing
            AppError::SerializationError(e) => {
                let sanitized = sanitize_serde_error(e);
                return (
                    StatusCode::BAD_REQUEST,
                    axum::Json(ErrorResponse::new("serialization_error", &sanitized)),
                )
                    .into_response();
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.as_str()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.as_str()),
        };

        (status, axum::Json(ErrorResponse::new(error_type, message))).into_response()
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
fn sanitize_serde_error(e: &serde_json::Error) -> String {
    let msg = e.to_string();

    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("unknown field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Unknown field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
