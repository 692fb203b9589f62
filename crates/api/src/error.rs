//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::LoanError;
use idempotency::IdempotencyError;
use serde::Serialize;

/// One failed field in a request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Request body fields failed validation.
    Validation(Vec<FieldError>),
    /// Loan domain error.
    Loan(LoanError),
    /// Idempotency coordination error.
    Idempotency(IdempotencyError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Validation(details) => {
                let body = serde_json::json!({
                    "error": "validation failed",
                    "details": details,
                });
                return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(body)).into_response();
            }
            ApiError::Loan(err) => loan_error_to_response(err),
            ApiError::Idempotency(err) => idempotency_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn loan_error_to_response(err: LoanError) -> (StatusCode, String) {
    match &err {
        LoanError::NotFound(_) => (StatusCode::NOT_FOUND, "loan not found".to_string()),
        LoanError::AlreadyApproved(_) => {
            (StatusCode::CONFLICT, "loan already approved".to_string())
        }
        LoanError::InvalidTransition { .. } => (
            StatusCode::CONFLICT,
            "loan not in a state that can be approved".to_string(),
        ),
        // Storage failures keep the 400 clients already depend on.
        LoanError::Storage(_) => {
            tracing::warn!(error = %err, "storage failure surfaced to client");
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        LoanError::PendingLoanExists { .. } | LoanError::InvalidInput(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
    }
}

fn idempotency_error_to_response(err: IdempotencyError) -> (StatusCode, String) {
    let status = match &err {
        e if e.is_client_input() => StatusCode::BAD_REQUEST,
        e if e.is_conflict() => StatusCode::CONFLICT,
        IdempotencyError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => {
            tracing::error!(error = %err, "idempotent handler failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<LoanError> for ApiError {
    fn from(err: LoanError) -> Self {
        ApiError::Loan(err)
    }
}

impl From<IdempotencyError> for ApiError {
    fn from(err: IdempotencyError) -> Self {
        ApiError::Idempotency(err)
    }
}
