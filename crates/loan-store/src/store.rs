use async_trait::async_trait;
use common::{Approval, ApprovalId, BorrowerId, Loan, LoanId, LoanPk, NewApproval, NewLoan};
use futures_util::future::BoxFuture;

use crate::{Result, StoreError};

/// Non-transactional reads and inserts.
#[async_trait]
pub trait LoanRepository: Send + Sync {
    /// Inserts a new loan in the `Proposed` state.
    async fn create_loan(&self, loan: NewLoan) -> Result<Loan>;

    /// Loads a loan by its public identifier.
    async fn get_loan(&self, loan_id: &LoanId) -> Result<Option<Loan>>;

    /// Returns the borrower's open (`Proposed`) loan, if any.
    async fn find_proposed_loan_by_borrower(
        &self,
        borrower_id: &BorrowerId,
    ) -> Result<Option<Loan>>;

    /// Loads an approval by its public identifier.
    async fn get_approval(&self, approval_id: &ApprovalId) -> Result<Option<Approval>>;
}

/// Repository operations bound to one open transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// every write made through it and releases its row locks.
#[async_trait]
pub trait LoanTransaction: Send + Sized {
    /// Loads a loan and holds an exclusive lock on its row until the
    /// transaction ends. Returns `None` if no live loan has this identifier.
    async fn lock_loan_for_update(&mut self, loan_id: &LoanId) -> Result<Option<Loan>>;

    /// Writes the loan's mutable fields back to its row.
    async fn save_loan(&mut self, loan: &Loan) -> Result<()>;

    /// Inserts an approval. Fails with [`StoreError::UniqueViolation`] if the
    /// loan already has a live approval.
    async fn create_approval(&mut self, approval: NewApproval) -> Result<Approval>;

    /// Returns the live approval referencing the loan, if any.
    async fn find_approval_by_loan(&mut self, loan_pk: LoanPk) -> Result<Option<Approval>>;

    /// Makes every write visible and releases the row locks.
    async fn commit(self) -> Result<()>;

    /// Discards every write and releases the row locks.
    async fn rollback(self) -> Result<()>;
}

/// Opens transactions against the relational store.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Tx: LoanTransaction + 'static;

    /// Starts a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// A complete loan store: transactional writes plus plain reads.
pub trait LoanStore: UnitOfWork + LoanRepository {}

impl<T: UnitOfWork + LoanRepository> LoanStore for T {}

/// Runs `f` inside a transaction.
///
/// The transaction commits if `f` returns `Ok` and rolls back otherwise, so a
/// failed unit of work leaves no partial writes behind.
pub async fn run_in_transaction<U, F, T, E>(uow: &U, f: F) -> std::result::Result<T, E>
where
    U: UnitOfWork + ?Sized,
    F: for<'t> FnOnce(&'t mut U::Tx) -> BoxFuture<'t, std::result::Result<T, E>> + Send,
    T: Send,
    E: From<StoreError> + Send,
{
    let mut tx = uow.begin().await?;

    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "transaction rollback failed");
            }
            Err(err)
        }
    }
}
