//! Error types for callmeter storage.

use callmeter_core::BillingError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique key is already taken.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The wallet changed between read and commit.
    #[error("version conflict on wallet {wallet_id}: expected {expected}, found {found}")]
    Conflict {
        /// The wallet whose version moved.
        wallet_id: String,
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        found: u64,
    },
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(what) => Self::AlreadyExists(what),
            StoreError::Conflict { wallet_id, .. } => Self::LockContention { wallet_id },
            other => Self::Storage(other.to_string()),
        }
    }
}
