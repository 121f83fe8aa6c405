//! Error types for the persisted stores.

use thiserror::Error;

use crate::account::AccountId;

/// Errors from the account and acknowledgement stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Rejected user input (bad port, empty username, ...)
    #[error("invalid input: {0}")]
    Validation(String),

    /// Reference to an account that does not exist
    #[error("account {0} not found")]
    NotFound(AccountId),

    /// SQLx error (connection, query, constraint, ...)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
