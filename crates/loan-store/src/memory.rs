use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    Approval, ApprovalId, BorrowerId, Loan, LoanId, LoanPk, LoanState, NewApproval, NewLoan,
};
use tokio::sync::{OwnedMutexGuard, RwLock};

use crate::store::{LoanRepository, LoanTransaction, UnitOfWork};
use crate::{APPROVAL_PER_LOAN_CONSTRAINT, LOAN_ID_CONSTRAINT, Result, StoreError};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

type RowLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug, Default)]
struct Tables {
    loans: BTreeMap<LoanPk, Loan>,
    approvals: Vec<Approval>,
}

/// In-memory loan store for testing and local runs.
///
/// Mirrors the PostgreSQL implementation: each loan row has its own lock,
/// transaction writes are staged and only become visible on commit, and a
/// transaction dropped without committing leaves no trace.
#[derive(Clone)]
pub struct InMemoryLoanStore {
    tables: Arc<RwLock<Tables>>,
    row_locks: Arc<Mutex<HashMap<LoanPk, RowLock>>>,
    next_loan_pk: Arc<AtomicI64>,
    next_approval_pk: Arc<AtomicI64>,
    fail_on_create_approval: Arc<AtomicBool>,
    fail_on_get_loan: Arc<AtomicBool>,
    lock_timeout: Duration,
}

impl Default for InMemoryLoanStore {
    fn default() -> Self {
        Self {
            tables: Arc::default(),
            row_locks: Arc::default(),
            next_loan_pk: Arc::new(AtomicI64::new(1)),
            next_approval_pk: Arc::new(AtomicI64::new(1)),
            fail_on_create_approval: Arc::default(),
            fail_on_get_loan: Arc::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl InMemoryLoanStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a transaction waits for a row lock before failing.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Configures approval inserts to fail, simulating a storage fault.
    pub fn set_fail_on_create_approval(&self, fail: bool) {
        self.fail_on_create_approval.store(fail, Ordering::SeqCst);
    }

    /// Configures loan lookups by public id to fail.
    pub fn set_fail_on_get_loan(&self, fail: bool) {
        self.fail_on_get_loan.store(fail, Ordering::SeqCst);
    }

    /// Overwrites a loan's state outside any transaction.
    ///
    /// Returns false if the loan does not exist.
    pub async fn set_loan_state(&self, loan_id: &LoanId, state: LoanState) -> bool {
        let mut tables = self.tables.write().await;
        match tables.loans.values_mut().find(|l| &l.loan_id == loan_id) {
            Some(loan) => {
                loan.transition_to(state, Utc::now());
                true
            }
            None => false,
        }
    }

    /// Returns the number of committed loans.
    pub async fn loan_count(&self) -> usize {
        self.tables.read().await.loans.len()
    }

    /// Returns the number of committed approvals.
    pub async fn approval_count(&self) -> usize {
        self.tables.read().await.approvals.len()
    }

    /// Returns every committed approval referencing the loan.
    pub async fn approvals_for_loan(&self, loan_pk: LoanPk) -> Vec<Approval> {
        self.tables
            .read()
            .await
            .approvals
            .iter()
            .filter(|a| a.loan_pk == loan_pk)
            .cloned()
            .collect()
    }

    fn row_lock(&self, pk: LoanPk) -> RowLock {
        self.row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(pk)
            .or_default()
            .clone()
    }

    /// Drops the row lock entries for `pks` that no transaction still holds or awaits.
    fn prune_row_locks(&self, pks: impl IntoIterator<Item = LoanPk>) {
        let mut row_locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        for pk in pks {
            if row_locks
                .get(&pk)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                row_locks.remove(&pk);
            }
        }
    }

    #[cfg(test)]
    fn row_lock_count(&self) -> usize {
        self.row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl LoanRepository for InMemoryLoanStore {
    async fn create_loan(&self, loan: NewLoan) -> Result<Loan> {
        let mut tables = self.tables.write().await;

        if tables.loans.values().any(|l| l.loan_id == loan.loan_id) {
            return Err(StoreError::UniqueViolation {
                constraint: LOAN_ID_CONSTRAINT.to_string(),
            });
        }

        let pk = LoanPk::new(self.next_loan_pk.fetch_add(1, Ordering::SeqCst));
        let record = Loan {
            id: pk,
            loan_id: loan.loan_id,
            borrower_id: loan.borrower_id,
            principal: loan.principal,
            rate: loan.rate,
            roi: loan.roi,
            state: LoanState::Proposed,
            state_updated_at: loan.created_at,
            created_at: loan.created_at,
        };
        tables.loans.insert(pk, record.clone());

        Ok(record)
    }

    async fn get_loan(&self, loan_id: &LoanId) -> Result<Option<Loan>> {
        if self.fail_on_get_loan.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("loan lookup failed".to_string()));
        }
        let tables = self.tables.read().await;
        Ok(tables.loans.values().find(|l| &l.loan_id == loan_id).cloned())
    }

    async fn find_proposed_loan_by_borrower(
        &self,
        borrower_id: &BorrowerId,
    ) -> Result<Option<Loan>> {
        let tables = self.tables.read().await;
        Ok(tables
            .loans
            .values()
            .filter(|l| &l.borrower_id == borrower_id && l.state == LoanState::Proposed)
            .min_by_key(|l| l.created_at)
            .cloned())
    }

    async fn get_approval(&self, approval_id: &ApprovalId) -> Result<Option<Approval>> {
        let tables = self.tables.read().await;
        Ok(tables
            .approvals
            .iter()
            .find(|a| &a.approval_id == approval_id)
            .cloned())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryLoanStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryTransaction {
            store: self.clone(),
            locks: HashMap::new(),
            staged_loans: BTreeMap::new(),
            staged_approvals: Vec::new(),
        })
    }
}

/// A transaction over [`InMemoryLoanStore`].
pub struct InMemoryTransaction {
    store: InMemoryLoanStore,
    locks: HashMap<LoanPk, OwnedMutexGuard<()>>,
    staged_loans: BTreeMap<LoanPk, Loan>,
    staged_approvals: Vec<Approval>,
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if self.locks.is_empty() {
            return;
        }
        let pks: Vec<LoanPk> = self.locks.keys().copied().collect();
        self.locks.clear();
        self.store.prune_row_locks(pks);
    }
}

#[async_trait]
impl LoanTransaction for InMemoryTransaction {
    async fn lock_loan_for_update(&mut self, loan_id: &LoanId) -> Result<Option<Loan>> {
        let pk = {
            let tables = self.store.tables.read().await;
            tables
                .loans
                .values()
                .find(|l| &l.loan_id == loan_id)
                .map(|l| l.id)
        };
        let Some(pk) = pk else {
            return Ok(None);
        };

        if !self.locks.contains_key(&pk) {
            let lock = self.store.row_lock(pk);
            let Ok(guard) = tokio::time::timeout(self.store.lock_timeout, lock.lock_owned()).await
            else {
                self.store.prune_row_locks([pk]);
                return Err(StoreError::LockTimeout(loan_id.to_string()));
            };
            self.locks.insert(pk, guard);
        }

        if let Some(staged) = self.staged_loans.get(&pk) {
            return Ok(Some(staged.clone()));
        }

        // Re-read after the lock is held so the caller sees the latest commit.
        let tables = self.store.tables.read().await;
        Ok(tables.loans.get(&pk).cloned())
    }

    async fn save_loan(&mut self, loan: &Loan) -> Result<()> {
        if !self.store.tables.read().await.loans.contains_key(&loan.id) {
            return Err(StoreError::Backend(format!(
                "loan row {} does not exist",
                loan.id
            )));
        }
        self.staged_loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn create_approval(&mut self, approval: NewApproval) -> Result<Approval> {
        if self.store.fail_on_create_approval.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("approval insert failed".to_string()));
        }

        if self.find_approval_by_loan(approval.loan_pk).await?.is_some() {
            return Err(StoreError::UniqueViolation {
                constraint: APPROVAL_PER_LOAN_CONSTRAINT.to_string(),
            });
        }

        let record = Approval {
            id: self.store.next_approval_pk.fetch_add(1, Ordering::SeqCst),
            approval_id: approval.approval_id,
            loan_pk: approval.loan_pk,
            photo_url: approval.photo_url,
            validator_employee_id: approval.validator_employee_id,
            approval_date: approval.approval_date,
            created_at: Utc::now(),
        };
        self.staged_approvals.push(record.clone());

        Ok(record)
    }

    async fn find_approval_by_loan(&mut self, loan_pk: LoanPk) -> Result<Option<Approval>> {
        if let Some(staged) = self.staged_approvals.iter().find(|a| a.loan_pk == loan_pk) {
            return Ok(Some(staged.clone()));
        }

        let tables = self.store.tables.read().await;
        Ok(tables
            .approvals
            .iter()
            .find(|a| a.loan_pk == loan_pk)
            .cloned())
    }

    async fn commit(mut self) -> Result<()> {
        let mut tables = self.store.tables.write().await;

        // Unique index check against approvals committed by other writers.
        if self
            .staged_approvals
            .iter()
            .any(|staged| tables.approvals.iter().any(|a| a.loan_pk == staged.loan_pk))
        {
            return Err(StoreError::UniqueViolation {
                constraint: APPROVAL_PER_LOAN_CONSTRAINT.to_string(),
            });
        }

        let loans = std::mem::take(&mut self.staged_loans);
        let approvals = std::mem::take(&mut self.staged_approvals);
        tracing::debug!(
            loans = loans.len(),
            approvals = approvals.len(),
            "committing in-memory transaction"
        );

        tables.loans.extend(loans);
        tables.approvals.extend(approvals);

        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
