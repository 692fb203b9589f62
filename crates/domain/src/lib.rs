//! Domain layer for the loan service.
//!
//! - [`LoanService`] opens proposals and enforces one open proposal per borrower
//! - [`ApprovalOrchestrator`] runs the `proposed → approved` transition inside
//!   a single transaction under an exclusive row lock

pub mod error;
pub mod loan;

pub use error::{LoanError, Result};
pub use loan::{ApprovalOrchestrator, ApproveLoan, CreateLoan, LoanService};
