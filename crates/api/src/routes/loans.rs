//! Loan endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use common::{Approval, ApprovalId, BorrowerId, EmployeeId, Loan, LoanId, LoanState, is_hex32};
use domain::{ApprovalOrchestrator, ApproveLoan, CreateLoan, LoanError, LoanService};
use loan_store::LoanStore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ApiError, FieldError};

/// Shared application state.
pub struct AppState<S> {
    pub loans: LoanService<S>,
    pub approvals: ApprovalOrchestrator<S>,
}

impl<S: LoanStore + Clone> AppState<S> {
    /// Builds the services over one shared store.
    pub fn new(store: S) -> Self {
        Self {
            loans: LoanService::new(store.clone()),
            approvals: ApprovalOrchestrator::new(store),
        }
    }
}

// --- Request/Response DTOs ---

#[derive(Debug, Deserialize)]
pub struct CreateLoanRequest {
    #[serde(default)]
    pub borrower_id: String,
    pub principal: Decimal,
    #[serde(default)]
    pub rate: Decimal,
    #[serde(default)]
    pub roi: Decimal,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApproveLoanRequest {
    pub photo_url: String,
    pub validator_employee_id: String,
    pub approval_date: String,
}

#[derive(Debug, Serialize)]
pub struct LoanResponse {
    pub loan_id: LoanId,
    pub borrower_id: BorrowerId,
    #[serde(with = "rust_decimal::serde::float")]
    pub principal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub roi: Decimal,
    pub state: LoanState,
    pub created_at: DateTime<Utc>,
}

impl From<Loan> for LoanResponse {
    fn from(loan: Loan) -> Self {
        Self {
            loan_id: loan.loan_id,
            borrower_id: loan.borrower_id,
            principal: loan.principal,
            rate: loan.rate,
            roi: loan.roi,
            state: loan.state,
            created_at: loan.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub approval_id: ApprovalId,
    pub loan_id: LoanId,
    pub photo_url: String,
    pub approved_at: DateTime<Utc>,
}

impl ApprovalResponse {
    fn new(loan_id: LoanId, approval: Approval) -> Self {
        Self {
            approved_at: approval.approved_at(),
            approval_id: approval.approval_id,
            loan_id,
            photo_url: approval.photo_url,
        }
    }
}

// --- Handlers ---

/// POST /loans: opens a loan proposal for a borrower.
#[tracing::instrument(skip(state, payload))]
pub async fn create<S: LoanStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<CreateLoanRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<LoanResponse>), ApiError> {
    let Json(req) = payload.map_err(|_| ApiError::BadRequest("invalid body".to_string()))?;

    let borrower_id = BorrowerId::parse(req.borrower_id)
        .map_err(|err| LoanError::InvalidInput(err.to_string()))?;
    let cmd = CreateLoan::new(borrower_id, req.principal, req.rate, req.roi);

    let loan = state.loans.create_loan(cmd).await?;
    Ok((StatusCode::CREATED, Json(loan.into())))
}

/// GET /loans/{loan_id}: returns a loan by its public identifier.
#[tracing::instrument(skip(state))]
pub async fn get<S: LoanStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(loan_id): Path<String>,
) -> Result<Json<LoanResponse>, ApiError> {
    let not_found = || ApiError::NotFound("not found".to_string());

    let loan_id = LoanId::parse(loan_id).map_err(|_| not_found())?;
    let loan = state
        .loans
        .get_loan(&loan_id)
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, %loan_id, "loan lookup failed");
            not_found()
        })?
        .ok_or_else(not_found)?;

    Ok(Json(loan.into()))
}

/// POST /loans/{loan_id}/approve: approves a proposed loan.
#[tracing::instrument(skip(state, payload))]
pub async fn approve<S: LoanStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(loan_id): Path<String>,
    payload: Result<Json<ApproveLoanRequest>, JsonRejection>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    if loan_id.trim().is_empty() {
        return Err(ApiError::BadRequest("missing loan_id path param".to_string()));
    }
    let Json(req) = payload.map_err(|_| ApiError::BadRequest("invalid body".to_string()))?;
    let (validator_employee_id, approval_date) =
        validate_approval(&req).map_err(ApiError::Validation)?;

    // A malformed id cannot name a stored loan.
    let loan_id = LoanId::parse(loan_id)
        .map_err(|_| ApiError::NotFound("loan not found".to_string()))?;

    let cmd = ApproveLoan::new(
        loan_id.clone(),
        req.photo_url,
        validator_employee_id,
        approval_date,
    );
    let approval = state.approvals.approve(cmd).await?;

    Ok(Json(ApprovalResponse::new(loan_id, approval)))
}

/// Checks every approval field and reports all failures together.
fn validate_approval(
    req: &ApproveLoanRequest,
) -> Result<(EmployeeId, NaiveDate), Vec<FieldError>> {
    let mut errors = Vec::new();

    let photo_url = req.photo_url.trim();
    if photo_url.is_empty() {
        errors.push(FieldError::new("photo_url", "is required"));
    } else if !is_http_url(photo_url) {
        errors.push(FieldError::new("photo_url", "must be a valid URL"));
    }

    let employee = req.validator_employee_id.trim();
    let validator_employee_id = if employee.is_empty() {
        errors.push(FieldError::new("validator_employee_id", "is required"));
        None
    } else if !is_hex32(employee) {
        errors.push(FieldError::new(
            "validator_employee_id",
            "must be 32-char lowercase hex",
        ));
        None
    } else {
        EmployeeId::parse(employee).ok()
    };

    let date = req.approval_date.trim();
    let approval_date = if date.is_empty() {
        errors.push(FieldError::new("approval_date", "is required"));
        None
    } else {
        let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok();
        if parsed.is_none() {
            errors.push(FieldError::new("approval_date", "must be YYYY-MM-DD"));
        }
        parsed
    };

    match (validator_employee_id, approval_date) {
        (Some(employee), Some(date)) if errors.is_empty() => Ok((employee, date)),
        _ => Err(errors),
    }
}

fn is_http_url(value: &str) -> bool {
    if value.contains(char::is_whitespace) {
        return false;
    }
    let Ok(url) = Url::parse(value) else {
        return false;
    };
    // The parser skips extra slashes, so "https:///x.jpg" would gain a host.
    let authority = value.split_once("://").map(|(_, rest)| rest);
    matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some_and(|host| !host.is_empty())
        && authority.is_some_and(|rest| !rest.starts_with('/'))
}
