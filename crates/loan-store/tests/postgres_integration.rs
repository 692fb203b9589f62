//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and truncate the tables before
//! each test, so they run serially. Run with:
//!
//! ```bash
//! cargo test -p loan-store --test postgres_integration
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use common::{ApprovalId, BorrowerId, EmployeeId, LoanId, LoanPk, LoanState, NewApproval, NewLoan};
use loan_store::{
    APPROVAL_PER_LOAN_CONSTRAINT, LoanRepository, LoanTransaction, PostgresLoanStore, StoreError,
    UnitOfWork,
};
use rust_decimal::Decimal;
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresLoanStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresLoanStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    let store = PostgresLoanStore::new(pool);
    sqlx::query("TRUNCATE TABLE approvals, loans RESTART IDENTITY")
        .execute(store.pool())
        .await
        .unwrap();

    store
}

fn new_loan(loan_id: LoanId) -> NewLoan {
    NewLoan {
        loan_id,
        borrower_id: BorrowerId::new(),
        principal: Decimal::new(5_000_000, 0),
        rate: Decimal::new(1050, 4),
        roi: Decimal::new(800, 4),
        created_at: Utc::now(),
    }
}

fn new_approval(loan_pk: LoanPk) -> NewApproval {
    NewApproval {
        approval_id: ApprovalId::new(),
        loan_pk,
        photo_url: "https://cdn.example/x.jpg".to_string(),
        validator_employee_id: EmployeeId::parse("b".repeat(32)).unwrap(),
        approval_date: NaiveDate::from_ymd_opt(2025, 9, 6).unwrap(),
    }
}

#[tokio::test]
#[serial]
async fn create_and_fetch_loan() {
    let store = get_test_store().await;
    let loan_id = LoanId::parse("a".repeat(32)).unwrap();

    let created = store.create_loan(new_loan(loan_id.clone())).await.unwrap();
    assert_eq!(created.state, LoanState::Proposed);
    assert_eq!(created.principal, Decimal::new(5_000_000, 0));

    let fetched = store.get_loan(&loan_id).await.unwrap().unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.borrower_id, created.borrower_id);

    let pending = store
        .find_proposed_loan_by_borrower(&created.borrower_id)
        .await
        .unwrap();
    assert_eq!(pending.map(|l| l.loan_id), Some(loan_id));
}

#[tokio::test]
#[serial]
async fn committed_approval_is_visible() {
    let store = get_test_store().await;
    let loan = store.create_loan(new_loan(LoanId::new())).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let mut locked = tx.lock_loan_for_update(&loan.loan_id).await.unwrap().unwrap();
    let approval = tx.create_approval(new_approval(locked.id)).await.unwrap();
    locked.transition_to(LoanState::Approved, Utc::now());
    tx.save_loan(&locked).await.unwrap();
    tx.commit().await.unwrap();

    let stored = store.get_approval(&approval.approval_id).await.unwrap().unwrap();
    assert_eq!(stored.loan_pk, loan.id);
    assert_eq!(stored.approved_at().to_rfc3339(), "2025-09-06T00:00:00+00:00");

    let after = store.get_loan(&loan.loan_id).await.unwrap().unwrap();
    assert_eq!(after.state, LoanState::Approved);
}

#[tokio::test]
#[serial]
async fn rollback_discards_writes() {
    let store = get_test_store().await;
    let loan = store.create_loan(new_loan(LoanId::new())).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let mut locked = tx.lock_loan_for_update(&loan.loan_id).await.unwrap().unwrap();
    let approval = tx.create_approval(new_approval(locked.id)).await.unwrap();
    locked.transition_to(LoanState::Approved, Utc::now());
    tx.save_loan(&locked).await.unwrap();
    tx.rollback().await.unwrap();

    assert!(store.get_approval(&approval.approval_id).await.unwrap().is_none());
    let after = store.get_loan(&loan.loan_id).await.unwrap().unwrap();
    assert_eq!(after.state, LoanState::Proposed);
}

#[tokio::test]
#[serial]
async fn second_live_approval_violates_unique_index() {
    let store = get_test_store().await;
    let loan = store.create_loan(new_loan(LoanId::new())).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.create_approval(new_approval(loan.id)).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let result = tx.create_approval(new_approval(loan.id)).await;
    assert!(matches!(
        result,
        Err(StoreError::UniqueViolation { ref constraint })
            if constraint == APPROVAL_PER_LOAN_CONSTRAINT
    ));
}

#[tokio::test]
#[serial]
async fn row_lock_times_out_while_held() {
    let store = get_test_store()
        .await
        .with_lock_timeout(Duration::from_millis(200));
    let loan = store.create_loan(new_loan(LoanId::new())).await.unwrap();

    let mut holder = store.begin().await.unwrap();
    holder.lock_loan_for_update(&loan.loan_id).await.unwrap();

    let mut waiter = store.begin().await.unwrap();
    let blocked = waiter.lock_loan_for_update(&loan.loan_id).await;
    assert!(matches!(blocked, Err(StoreError::LockTimeout(_))));
    drop(waiter);

    holder.rollback().await.unwrap();

    let mut next = store.begin().await.unwrap();
    assert!(
        next.lock_loan_for_update(&loan.loan_id)
            .await
            .unwrap()
            .is_some()
    );
}
