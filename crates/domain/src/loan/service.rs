//! Loan service providing proposal creation and lookup.

use chrono::Utc;
use common::{Loan, LoanId, NewLoan};
use loan_store::LoanRepository;

use crate::error::{LoanError, Result};

use super::CreateLoan;

/// Service for opening and reading loans.
///
/// A borrower may hold at most one `proposed` loan. The check runs before the
/// insert and outside any lock, so two concurrent creations for the same
/// borrower can both pass it.
#[derive(Clone)]
pub struct LoanService<S> {
    store: S,
}

impl<S: LoanRepository> LoanService<S> {
    /// Creates a new loan service over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Opens a new proposal for the borrower.
    #[tracing::instrument(skip(self, cmd), fields(borrower_id = %cmd.borrower_id))]
    pub async fn create_loan(&self, cmd: CreateLoan) -> Result<Loan> {
        cmd.validate()?;

        if let Some(pending) = self
            .store
            .find_proposed_loan_by_borrower(&cmd.borrower_id)
            .await?
        {
            return Err(LoanError::PendingLoanExists {
                borrower_id: cmd.borrower_id,
                loan_id: pending.loan_id,
            });
        }

        let loan = self
            .store
            .create_loan(NewLoan {
                loan_id: LoanId::new(),
                borrower_id: cmd.borrower_id,
                principal: cmd.principal,
                rate: cmd.rate,
                roi: cmd.roi,
                created_at: Utc::now(),
            })
            .await?;

        metrics::counter!("loans_created_total").increment(1);
        tracing::info!(loan_id = %loan.loan_id, "loan proposed");

        Ok(loan)
    }

    /// Loads a loan by its public identifier.
    ///
    /// Returns None if the loan doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_loan(&self, loan_id: &LoanId) -> Result<Option<Loan>> {
        Ok(self.store.get_loan(loan_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BorrowerId, LoanState};
    use loan_store::InMemoryLoanStore;
    use rust_decimal::Decimal;

    fn create_cmd(borrower_id: &BorrowerId) -> CreateLoan {
        CreateLoan::new(
            borrower_id.clone(),
            Decimal::new(5_000_000, 0),
            Decimal::new(105, 3),
            Decimal::new(8, 2),
        )
    }

    #[tokio::test]
    async fn create_loan_starts_proposed() {
        let service = LoanService::new(InMemoryLoanStore::new());
        let borrower = BorrowerId::new();

        let loan = service.create_loan(create_cmd(&borrower)).await.unwrap();

        assert_eq!(loan.state, LoanState::Proposed);
        assert_eq!(loan.borrower_id, borrower);
        assert_eq!(loan.loan_id.as_str().len(), 32);
        assert_eq!(loan.state_updated_at, loan.created_at);
    }

    #[tokio::test]
    async fn second_proposal_for_borrower_is_rejected() {
        let service = LoanService::new(InMemoryLoanStore::new());
        let borrower = BorrowerId::new();
        let first = service.create_loan(create_cmd(&borrower)).await.unwrap();

        let err = service.create_loan(create_cmd(&borrower)).await.unwrap_err();

        match err {
            LoanError::PendingLoanExists { loan_id, .. } => assert_eq!(loan_id, first.loan_id),
            other => panic!("expected PendingLoanExists, got {other:?}"),
        }
        let message = service
            .create_loan(create_cmd(&borrower))
            .await
            .unwrap_err()
            .to_string();
        assert!(message.contains("already has a pending loan"));
        assert_eq!(service.store().loan_count().await, 1);
    }

    #[tokio::test]
    async fn borrower_can_reapply_once_proposal_leaves_proposed() {
        let store = InMemoryLoanStore::new();
        let service = LoanService::new(store.clone());
        let borrower = BorrowerId::new();
        let first = service.create_loan(create_cmd(&borrower)).await.unwrap();

        store.set_loan_state(&first.loan_id, LoanState::Rejected).await;

        assert!(service.create_loan(create_cmd(&borrower)).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_input_does_not_touch_store() {
        let service = LoanService::new(InMemoryLoanStore::new());
        let mut cmd = create_cmd(&BorrowerId::new());
        cmd.principal = Decimal::ZERO;

        assert!(matches!(
            service.create_loan(cmd).await,
            Err(LoanError::InvalidInput(_))
        ));
        assert_eq!(service.store().loan_count().await, 0);
    }

    #[tokio::test]
    async fn get_missing_loan_returns_none() {
        let service = LoanService::new(InMemoryLoanStore::new());
        assert!(service.get_loan(&LoanId::new()).await.unwrap().is_none());
    }
}
