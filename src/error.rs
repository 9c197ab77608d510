//! Error handling

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::sync::OnceLock;

pub type AppResult<T> = Result<T, AppError>;

/// Set once at startup. When enabled (non-production), 500 responses carry the
/// underlying error detail; in production the client only sees a generic message.
static DEBUG_ERRORS: OnceLock<bool> = OnceLock::new();

pub fn set_debug_errors(enabled: bool) {
    let _ = DEBUG_ERRORS.set(enabled);
}

fn debug_errors() -> bool {
    *DEBUG_ERRORS.get().unwrap_or(&false)
}

#[derive(Debug)]
pub enum AppError {
    // Auth errors
    Unauthorized,
    Forbidden,
    TokenInvalid,

    // Agent protocol errors
    InvalidToken(String),
    AccountNotFound,
    AccountInactive,
    LicenseExhausted,
    EndpointNotFound,

    // Resource errors
    NotFound(String),
    StoreConflict(String),

    // Validation errors
    ValidationError(String),

    // Database errors
    DatabaseError(String),

    // Generic errors
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required".to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Access denied".to_string()),
            AppError::TokenInvalid => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),
            AppError::InvalidToken(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::AccountNotFound | AppError::AccountInactive => {
                (StatusCode::BAD_REQUEST, "Invalid or inactive account".to_string())
            }
            AppError::LicenseExhausted => (
                StatusCode::FORBIDDEN,
                "No available licenses. Please upgrade your plan or allocate more licenses.".to_string(),
            ),
            AppError::EndpointNotFound => (StatusCode::NOT_FOUND, "Endpoint not found".to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::StoreConflict(msg) => {
                tracing::warn!("Store conflict not resolved by retry: {}", msg);
                (StatusCode::CONFLICT, "Conflicting concurrent update".to_string())
            }
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = match &self {
            AppError::DatabaseError(detail) | AppError::InternalError(detail) if debug_errors() => {
                Json(json!({ "error": error_message, "details": detail }))
            }
            _ => Json(json!({ "error": error_message })),
        };

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        AppError::TokenInvalid
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

/// True when the underlying database error is a unique-constraint violation.
/// Registration treats this as "endpoint already exists" and retries as an update.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
