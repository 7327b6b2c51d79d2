use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Payout error: {0}")]
    Payout(#[from] PayoutError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("External error: {0}")]
    External(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Session-related errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Amount below minimum: {amount} < {minimum}")]
    BelowMinimum { amount: String, minimum: String },

    #[error("Amount above maximum: {amount} > {maximum}")]
    AboveMaximum { amount: String, maximum: String },

    #[error("Invalid payout destination: {0}")]
    InvalidDestination(String),

    #[error("Session in invalid state: {current}, expected: {expected}")]
    InvalidState { current: String, expected: String },

    #[error("Session expired")]
    Expired,
}

/// Chain data source errors
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("RPC request failed: {0}")]
    Rpc(String),

    #[error("RPC response malformed: {0}")]
    MalformedResponse(String),

    #[error("Log decoding failed: {0}")]
    Decode(String),
}

/// Payout pipeline errors
#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("Payout call failed: {0}")]
    ProviderCall(String),

    #[error("Payout rejected by provider: {0}")]
    Rejected(String),

    #[error("Retry budget exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::Session(SessionError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "SESSION_NOT_FOUND",
                format!("Session not found: {}", id),
            ),
            AppError::Session(SessionError::BelowMinimum { amount, minimum }) => (
                StatusCode::BAD_REQUEST,
                "AMOUNT_BELOW_MINIMUM",
                format!("Minimum sell amount is {} (got {})", minimum, amount),
            ),
            AppError::Session(SessionError::AboveMaximum { amount, maximum }) => (
                StatusCode::BAD_REQUEST,
                "AMOUNT_ABOVE_MAXIMUM",
                format!("Maximum sell amount is {} (got {})", maximum, amount),
            ),
            AppError::Session(SessionError::InvalidDestination(reason)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_DESTINATION",
                format!("Invalid payout destination: {}", reason),
            ),
            AppError::Session(SessionError::InvalidState { current, expected }) => (
                StatusCode::CONFLICT,
                "SESSION_INVALID_STATE",
                format!("Session is {}, expected {}", current, expected),
            ),
            AppError::Session(SessionError::Expired) => (
                StatusCode::GONE,
                "SESSION_EXPIRED",
                "Session has expired".to_string(),
            ),
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                msg.clone(),
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized".to_string(),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::External(format!("HTTP request error: {:?}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
