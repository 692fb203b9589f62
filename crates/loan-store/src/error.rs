use thiserror::Error;

/// Errors that can occur when interacting with the loan store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// The row lock could not be acquired before the deadline.
    #[error("timed out waiting for row lock on loan {0}")]
    LockTimeout(String),

    /// A stored row could not be mapped back into a record.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The backend reported a failure that is not a database error.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for loan store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
