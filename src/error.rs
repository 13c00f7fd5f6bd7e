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
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Unauthorized: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Escrow state-machine errors
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("an active payment already exists for buyer {buyer} on listing {listing}")]
    AlreadyActive { buyer: String, listing: String },

    #[error("nothing to release: remaining balance is zero")]
    NothingToRelease,
}

/// Errors from the XRP Ledger client
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("transaction rejected by the ledger: {code}")]
    Rejected { code: String },

    #[error("ledger unreachable after {attempts} attempts: {last_error}")]
    Unreachable { attempts: u32, last_error: String },

    #[error("malformed ledger response: {0}")]
    MalformedResponse(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg,
                None,
            ),
            AppError::Authentication(msg) => (
                StatusCode::UNAUTHORIZED,
                "AUTHENTICATION_FAILED",
                msg,
                None,
            ),
            AppError::Authorization(msg) => (
                StatusCode::FORBIDDEN,
                "AUTHORIZATION_FAILED",
                msg,
                None,
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg,
                None,
            ),
            AppError::Duplicate(msg) => (
                StatusCode::CONFLICT,
                "DUPLICATE",
                msg,
                None,
            ),
            AppError::Payment(PaymentError::AlreadyActive { buyer, listing }) => (
                StatusCode::CONFLICT,
                "PAYMENT_ALREADY_ACTIVE",
                format!(
                    "An active payment already exists for buyer {} on listing {}",
                    buyer, listing
                ),
                Some(serde_json::json!({
                    "buyer_wallet": buyer,
                    "listing_id": listing,
                })),
            ),
            AppError::Payment(PaymentError::NothingToRelease) => (
                StatusCode::BAD_REQUEST,
                "NOTHING_TO_RELEASE",
                "Nothing to release: remaining balance is zero".to_string(),
                None,
            ),
            AppError::Ledger(e) => (
                StatusCode::BAD_GATEWAY,
                "LEDGER_ERROR",
                format!("Ledger operation failed: {}", e),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Ledger(LedgerError::MalformedResponse(format!("{:?}", error)))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
