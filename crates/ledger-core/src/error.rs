//! Error types for the credit ledger.

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger domain operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Workspace not found.
    #[error("workspace not found: {workspace_id}")]
    WorkspaceNotFound {
        /// The workspace id that was not found.
        workspace_id: String,
    },

    /// A pricing plan could not be resolved.
    #[error("unknown pricing plan: {0}")]
    UnknownPlan(i32),

    /// Subscription failed model-level validation.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}
