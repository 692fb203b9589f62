//! Transactional loan approval.

use std::time::Instant;

use chrono::Utc;
use common::{Approval, ApprovalId, LoanState, NewApproval};
use loan_store::{
    APPROVAL_PER_LOAN_CONSTRAINT, LoanStore, LoanTransaction, StoreError, run_in_transaction,
};

use crate::error::{LoanError, Result};

use super::ApproveLoan;

/// Drives the `proposed → approved` transition.
///
/// Every approval runs in one transaction that first takes an exclusive lock
/// on the loan row. Concurrent approvals of the same loan therefore execute one
/// after another: the first commits, the rest observe `approved` and fail with
/// [`LoanError::AlreadyApproved`]. The unique index on live approvals backs
/// this up at the storage level.
#[derive(Clone)]
pub struct ApprovalOrchestrator<S> {
    store: S,
}

impl<S: LoanStore> ApprovalOrchestrator<S> {
    /// Creates a new orchestrator over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Approves a proposed loan and records the approval evidence.
    ///
    /// Nothing is written unless the whole unit of work succeeds.
    #[tracing::instrument(skip(self, cmd), fields(loan_id = %cmd.loan_id))]
    pub async fn approve(&self, cmd: ApproveLoan) -> Result<Approval> {
        let started = Instant::now();
        let loan_id = cmd.loan_id.clone();

        let result = run_in_transaction(&self.store, move |tx| Box::pin(approve_locked(tx, cmd)))
            .await
            .map_err(|err| match err {
                LoanError::Storage(StoreError::UniqueViolation { ref constraint })
                    if constraint == APPROVAL_PER_LOAN_CONSTRAINT =>
                {
                    LoanError::AlreadyApproved(loan_id.clone())
                }
                other => other,
            });

        let outcome = match &result {
            Ok(_) => "approved",
            Err(LoanError::NotFound(_)) => "not_found",
            Err(LoanError::AlreadyApproved(_)) => "already_approved",
            Err(LoanError::InvalidTransition { .. }) => "invalid_transition",
            Err(_) => "error",
        };
        metrics::counter!("loan_approvals_total", "outcome" => outcome).increment(1);
        metrics::histogram!("loan_approval_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(approval) => {
                tracing::info!(approval_id = %approval.approval_id, "loan approved");
            }
            Err(LoanError::Storage(err)) => {
                tracing::error!(error = %err, "approval rolled back");
            }
            Err(err) => {
                tracing::debug!(error = %err, "approval refused");
            }
        }

        result
    }
}

async fn approve_locked<T: LoanTransaction>(tx: &mut T, cmd: ApproveLoan) -> Result<Approval> {
    let mut loan = tx
        .lock_loan_for_update(&cmd.loan_id)
        .await?
        .ok_or_else(|| LoanError::NotFound(cmd.loan_id.clone()))?;

    if !loan.state.can_approve() {
        return Err(match loan.state {
            LoanState::Approved => LoanError::AlreadyApproved(loan.loan_id),
            state => LoanError::InvalidTransition {
                loan_id: loan.loan_id,
                state,
            },
        });
    }

    // A live approval row wins over a loan still marked proposed.
    if tx.find_approval_by_loan(loan.id).await?.is_some() {
        return Err(LoanError::AlreadyApproved(loan.loan_id));
    }

    let approval = tx
        .create_approval(NewApproval {
            approval_id: ApprovalId::new(),
            loan_pk: loan.id,
            photo_url: cmd.photo_url,
            validator_employee_id: cmd.validator_employee_id,
            approval_date: cmd.approval_date,
        })
        .await?;

    loan.transition_to(LoanState::Approved, Utc::now());
    tx.save_loan(&loan).await?;

    Ok(approval)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use chrono::NaiveDate;
    use common::{BorrowerId, EmployeeId, LoanId, NewLoan};
    use loan_store::{InMemoryLoanStore, LoanRepository, UnitOfWork};
    use rust_decimal::Decimal;

    async fn seed_loan(store: &InMemoryLoanStore, loan_id: LoanId) -> common::Loan {
        store
            .create_loan(NewLoan {
                loan_id,
                borrower_id: BorrowerId::new(),
                principal: Decimal::new(5_000_000, 0),
                rate: Decimal::new(105, 3),
                roi: Decimal::new(8, 2),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    fn approve_cmd(loan_id: &LoanId) -> ApproveLoan {
        ApproveLoan::new(
            loan_id.clone(),
            "https://cdn.example/x.jpg",
            EmployeeId::parse("b".repeat(32)).unwrap(),
            NaiveDate::from_ymd_opt(2025, 9, 6).unwrap(),
        )
    }

    #[tokio::test]
    async fn approves_proposed_loan() {
        let store = InMemoryLoanStore::new();
        let loan_id = LoanId::parse("a".repeat(32)).unwrap();
        let loan = seed_loan(&store, loan_id.clone()).await;
        let orchestrator = ApprovalOrchestrator::new(store.clone());

        let approval = orchestrator.approve(approve_cmd(&loan_id)).await.unwrap();

        assert_eq!(approval.loan_pk, loan.id);
        assert_eq!(approval.photo_url, "https://cdn.example/x.jpg");
        assert_eq!(approval.approved_at().to_rfc3339(), "2025-09-06T00:00:00+00:00");

        let stored = store.get_loan(&loan_id).await.unwrap().unwrap();
        assert_eq!(stored.state, LoanState::Approved);
        assert!(stored.state_updated_at >= loan.state_updated_at);
        assert_eq!(store.approvals_for_loan(loan.id).await.len(), 1);

        let again = orchestrator.approve(approve_cmd(&loan_id)).await;
        assert!(matches!(again, Err(LoanError::AlreadyApproved(_))));
        assert_eq!(store.approvals_for_loan(loan.id).await.len(), 1);
    }

    #[tokio::test]
    async fn missing_loan_is_not_found() {
        let orchestrator = ApprovalOrchestrator::new(InMemoryLoanStore::new());
        let result = orchestrator.approve(approve_cmd(&LoanId::new())).await;
        assert!(matches!(result, Err(LoanError::NotFound(_))));
    }

    #[tokio::test]
    async fn rejected_loan_is_invalid_transition() {
        let store = InMemoryLoanStore::new();
        let loan = seed_loan(&store, LoanId::new()).await;
        store.set_loan_state(&loan.loan_id, LoanState::Rejected).await;
        let orchestrator = ApprovalOrchestrator::new(store.clone());

        let result = orchestrator.approve(approve_cmd(&loan.loan_id)).await;

        assert!(matches!(
            result,
            Err(LoanError::InvalidTransition {
                state: LoanState::Rejected,
                ..
            })
        ));
        assert_eq!(store.approval_count().await, 0);
        let stored = store.get_loan(&loan.loan_id).await.unwrap().unwrap();
        assert_eq!(stored.state, LoanState::Rejected);
    }

    #[tokio::test]
    async fn proposed_loan_with_live_approval_is_already_approved() {
        let store = InMemoryLoanStore::new();
        let loan = seed_loan(&store, LoanId::new()).await;

        let mut tx = store.begin().await.unwrap();
        tx.create_approval(NewApproval {
            approval_id: ApprovalId::new(),
            loan_pk: loan.id,
            photo_url: "https://cdn.example/earlier.jpg".to_string(),
            validator_employee_id: EmployeeId::new(),
            approval_date: NaiveDate::from_ymd_opt(2025, 9, 5).unwrap(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let orchestrator = ApprovalOrchestrator::new(store.clone());
        let result = orchestrator.approve(approve_cmd(&loan.loan_id)).await;

        assert!(matches!(result, Err(LoanError::AlreadyApproved(_))));
        assert_eq!(store.approval_count().await, 1);
        let stored = store.get_loan(&loan.loan_id).await.unwrap().unwrap();
        assert_eq!(stored.state, LoanState::Proposed);
    }

    #[tokio::test]
    async fn failed_insert_leaves_loan_proposed() {
        let store = InMemoryLoanStore::new();
        let loan = seed_loan(&store, LoanId::new()).await;
        store.set_fail_on_create_approval(true);
        let orchestrator = ApprovalOrchestrator::new(store.clone());

        let result = orchestrator.approve(approve_cmd(&loan.loan_id)).await;

        assert!(matches!(result, Err(LoanError::Storage(_))));
        assert_eq!(store.approval_count().await, 0);
        let stored = store.get_loan(&loan.loan_id).await.unwrap().unwrap();
        assert_eq!(stored.state, LoanState::Proposed);

        store.set_fail_on_create_approval(false);
        assert!(orchestrator.approve(approve_cmd(&loan.loan_id)).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_approvals_yield_exactly_one_success() {
        let store = InMemoryLoanStore::new();
        let loan = seed_loan(&store, LoanId::new()).await;
        let orchestrator = Arc::new(ApprovalOrchestrator::new(store.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                let cmd = approve_cmd(&loan.loan_id);
                tokio::spawn(async move { orchestrator.approve(cmd).await })
            })
            .collect();

        let mut successes = 0;
        let mut already_approved = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(LoanError::AlreadyApproved(_)) => already_approved += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(already_approved, 15);
        assert_eq!(store.approvals_for_loan(loan.id).await.len(), 1);
    }
}
