// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("No earnings record for user {0}")]
    LedgerNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("M-Pesa gateway error: {0}")]
    GatewayError(String),

    #[error("M-Pesa auth error: {0}")]
    AuthError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::MongoDB(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InsufficientBalance { .. } => {
                (StatusCode::BAD_REQUEST, "Insufficient balance".to_string())
            }
            AppError::LedgerNotFound(_) => {
                (StatusCode::NOT_FOUND, "Earnings record not found".to_string())
            }
            AppError::TransactionNotFound(_) => {
                (StatusCode::NOT_FOUND, "Transaction not found".to_string())
            }
            // Gateway detail is logged server-side; keep the response generic.
            AppError::GatewayError(_) | AppError::AuthError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Payment gateway error".to_string(),
            ),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = Json(json!({
            "error": error_message,
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::GatewayError(format!("HTTP request failed: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

// Helper constructors
impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn gateway(msg: impl Into<String>) -> Self {
        AppError::GatewayError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
