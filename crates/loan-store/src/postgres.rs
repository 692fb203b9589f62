use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    Approval, ApprovalId, BorrowerId, EmployeeId, Loan, LoanId, LoanPk, LoanState, NewApproval,
    NewLoan,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::store::{LoanRepository, LoanTransaction, UnitOfWork};
use crate::{Result, StoreError};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLSTATE raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

const LOAN_COLUMNS: &str =
    "id, loan_id, borrower_id, principal, rate, roi, state, state_updated_at, created_at";

const APPROVAL_COLUMNS: &str =
    "id, approval_id, loan_id, photo_url, validator_employee_id, approval_date, created_at";

/// PostgreSQL-backed loan store implementation.
#[derive(Clone)]
pub struct PostgresLoanStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresLoanStore {
    /// Creates a new PostgreSQL loan store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets the `lock_timeout` applied to every transaction.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn row_to_loan(row: PgRow) -> Result<Loan> {
    let loan_id: String = row.try_get("loan_id")?;
    let borrower_id: String = row.try_get("borrower_id")?;
    let state: String = row.try_get("state")?;

    Ok(Loan {
        id: LoanPk::new(row.try_get("id")?),
        loan_id: LoanId::parse(loan_id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        borrower_id: BorrowerId::parse(borrower_id)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        principal: row.try_get("principal")?,
        rate: row.try_get("rate")?,
        roi: row.try_get("roi")?,
        state: state
            .parse::<LoanState>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        state_updated_at: row.try_get("state_updated_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_approval(row: PgRow) -> Result<Approval> {
    let approval_id: String = row.try_get("approval_id")?;
    let validator: String = row.try_get("validator_employee_id")?;

    Ok(Approval {
        id: row.try_get("id")?,
        approval_id: ApprovalId::parse(approval_id)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        loan_pk: LoanPk::new(row.try_get("loan_id")?),
        photo_url: row.try_get("photo_url")?,
        validator_employee_id: EmployeeId::parse(validator)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        approval_date: row.try_get("approval_date")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Maps constraint and lock failures onto their dedicated variants.
fn map_db_error(err: sqlx::Error, loan_id: Option<&LoanId>) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation()
            && let Some(constraint) = db_err.constraint()
        {
            return StoreError::UniqueViolation {
                constraint: constraint.to_string(),
            };
        }
        if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) {
            let target = loan_id.map(ToString::to_string).unwrap_or_default();
            return StoreError::LockTimeout(target);
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl LoanRepository for PostgresLoanStore {
    async fn create_loan(&self, loan: NewLoan) -> Result<Loan> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO loans (loan_id, borrower_id, principal, rate, roi, state, state_updated_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING {LOAN_COLUMNS}
            "#
        ))
        .bind(loan.loan_id.as_str())
        .bind(loan.borrower_id.as_str())
        .bind(loan.principal)
        .bind(loan.rate)
        .bind(loan.roi)
        .bind(LoanState::Proposed.as_str())
        .bind(loan.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error(e, Some(&loan.loan_id)))?;

        row_to_loan(row)
    }

    async fn get_loan(&self, loan_id: &LoanId) -> Result<Option<Loan>> {
        let row = sqlx::query(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans WHERE loan_id = $1 AND deleted_at IS NULL"
        ))
        .bind(loan_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_loan).transpose()
    }

    async fn find_proposed_loan_by_borrower(
        &self,
        borrower_id: &BorrowerId,
    ) -> Result<Option<Loan>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {LOAN_COLUMNS}
            FROM loans
            WHERE borrower_id = $1 AND state = $2 AND deleted_at IS NULL
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(borrower_id.as_str())
        .bind(LoanState::Proposed.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_loan).transpose()
    }

    async fn get_approval(&self, approval_id: &ApprovalId) -> Result<Option<Approval>> {
        let row = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE approval_id = $1 AND deleted_at IS NULL"
        ))
        .bind(approval_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_approval).transpose()
    }
}

#[async_trait]
impl UnitOfWork for PostgresLoanStore {
    type Tx = PgLoanTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters; the value is an integer we own.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(PgLoanTransaction { tx })
    }
}

/// A transaction over [`PostgresLoanStore`].
///
/// Dropping it without committing rolls the database transaction back.
pub struct PgLoanTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LoanTransaction for PgLoanTransaction {
    async fn lock_loan_for_update(&mut self, loan_id: &LoanId) -> Result<Option<Loan>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {LOAN_COLUMNS}
            FROM loans
            WHERE loan_id = $1 AND deleted_at IS NULL
            FOR UPDATE
            "#
        ))
        .bind(loan_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_db_error(e, Some(loan_id)))?;

        row.map(row_to_loan).transpose()
    }

    async fn save_loan(&mut self, loan: &Loan) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET state = $1, state_updated_at = $2
            WHERE id = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(loan.state.as_str())
        .bind(loan.state_updated_at)
        .bind(loan.id.as_i64())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_db_error(e, Some(&loan.loan_id)))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!(
                "loan row {} does not exist",
                loan.id
            )));
        }
        Ok(())
    }

    async fn create_approval(&mut self, approval: NewApproval) -> Result<Approval> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO approvals (approval_id, loan_id, photo_url, validator_employee_id, approval_date, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {APPROVAL_COLUMNS}
            "#
        ))
        .bind(approval.approval_id.as_str())
        .bind(approval.loan_pk.as_i64())
        .bind(&approval.photo_url)
        .bind(approval.validator_employee_id.as_str())
        .bind(approval.approval_date)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_db_error(e, None))?;

        row_to_approval(row)
    }

    async fn find_approval_by_loan(&mut self, loan_pk: LoanPk) -> Result<Option<Approval>> {
        let row = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE loan_id = $1 AND deleted_at IS NULL"
        ))
        .bind(loan_pk.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_approval).transpose()
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(|e| map_db_error(e, None))
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
