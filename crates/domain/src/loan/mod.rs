//! Loan proposal and approval services.

mod approval;
mod commands;
mod service;

pub use approval::ApprovalOrchestrator;
pub use commands::{ApproveLoan, CreateLoan};
pub use service::LoanService;
