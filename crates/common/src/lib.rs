//! Shared identifiers and records for the lending service.
//!
//! Loans and approvals are addressed publicly by 32-character lowercase hex
//! identifiers; the relational store owns the numeric primary keys.

pub mod loan;
pub mod types;

pub use loan::{Approval, Loan, LoanState, NewApproval, NewLoan, UnknownLoanState};
pub use types::{
    ApprovalId, BorrowerId, EmployeeId, InvalidId, LoanId, LoanPk, is_hex32, new_id32,
};
