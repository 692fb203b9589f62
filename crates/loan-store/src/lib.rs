//! Transactional storage for loans and approvals.
//!
//! [`UnitOfWork`] opens a [`LoanTransaction`] whose writes commit or roll back
//! together. [`LoanTransaction::lock_loan_for_update`] takes an exclusive row
//! lock held until the transaction ends, which serializes concurrent state
//! transitions on the same loan.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryLoanStore, InMemoryTransaction};
pub use postgres::{PgLoanTransaction, PostgresLoanStore};
pub use store::{LoanRepository, LoanStore, LoanTransaction, UnitOfWork, run_in_transaction};

/// Name of the uniqueness constraint allowing one live approval per loan.
pub const APPROVAL_PER_LOAN_CONSTRAINT: &str = "ux_approvals_loan_active";

/// Name of the uniqueness constraint on public loan identifiers.
pub const LOAN_ID_CONSTRAINT: &str = "ux_loans_loan_id_active";
