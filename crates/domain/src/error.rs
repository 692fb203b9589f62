//! Domain error types.

use common::{BorrowerId, LoanId, LoanState};
use loan_store::StoreError;
use thiserror::Error;

/// Errors that can occur during loan operations.
#[derive(Debug, Error)]
pub enum LoanError {
    /// No live loan has the requested identifier.
    #[error("loan not found: {0}")]
    NotFound(LoanId),

    /// The loan is already approved or already has an approval.
    #[error("loan already approved: {0}")]
    AlreadyApproved(LoanId),

    /// The loan's state does not allow approval.
    #[error("loan {loan_id} cannot be approved from state {state}")]
    InvalidTransition { loan_id: LoanId, state: LoanState },

    /// The borrower already has an open proposal.
    #[error("borrower {borrower_id} already has a pending loan: {loan_id}")]
    PendingLoanExists {
        borrower_id: BorrowerId,
        loan_id: LoanId,
    },

    /// The request failed input validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The relational store failed.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Convenience type alias for loan results.
pub type Result<T> = std::result::Result<T, LoanError>;
