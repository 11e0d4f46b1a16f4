//! Storage error types.

use ledger_core::LedgerError;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("workspace", "subscription", ...).
        entity: &'static str,
        /// The id that was not found.
        id: String,
    },

    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] LedgerError),

    /// A stored row no longer maps onto the domain model.
    #[error("corrupt row in {table}: {message}")]
    CorruptRow {
        /// Table the row came from.
        table: &'static str,
        /// What failed to decode.
        message: String,
    },

    /// Database error (including lock timeouts, which the caller may
    /// retry).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Whether an sqlx error is a Postgres unique-constraint violation.
#[must_use]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(sqlx::error::DatabaseError::code)
        .is_some_and(|code| code == "23505")
}
