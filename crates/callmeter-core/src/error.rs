//! Error types for callmeter.

use rust_decimal::Decimal;

use crate::ids::IdError;
use crate::pricing::ServiceKind;

/// Result type for callmeter operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in callmeter operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// No active rate covers the requested service, provider and model.
    #[error("pricing not configured for {kind}/{provider}/{}", .model.as_deref().unwrap_or("*"))]
    PricingNotConfigured {
        /// Service kind being priced.
        kind: ServiceKind,
        /// Provider name.
        provider: String,
        /// Model name, if any.
        model: Option<String>,
    },

    /// The wallet cannot cover a debit.
    #[error("insufficient funds: required={required}, available={available}")]
    InsufficientFunds {
        /// Amount the debit needed.
        required: Decimal,
        /// Balance at the time of the attempt.
        available: Decimal,
    },

    /// Usage was reported for a call that has already been frozen.
    #[error("call already closed: {call_id}")]
    CallAlreadyClosed {
        /// The closed call.
        call_id: String,
    },

    /// The per-wallet lock could not be acquired after retrying.
    #[error("ledger busy for wallet {wallet_id}, retry later")]
    LockContention {
        /// The contended wallet.
        wallet_id: String,
    },

    /// Wallet not found.
    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    /// Call not found.
    #[error("call not found: {0}")]
    CallNotFound(String),

    /// Agent not found or not owned by the caller.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// Payment not found.
    #[error("payment not found: {0}")]
    PaymentNotFound(String),

    /// Ledger entry not found.
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// Rate record not found.
    #[error("rate not found: {0}")]
    RateNotFound(String),

    /// A resource that must be unique already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid rate definition.
    #[error("invalid rate: {0}")]
    InvalidRate(String),

    /// The requested currency differs from the wallet currency.
    #[error("currency mismatch: wallet holds {expected}, got {actual}")]
    CurrencyMismatch {
        /// Wallet currency.
        expected: String,
        /// Requested currency.
        actual: String,
    },

    /// Operation not allowed in the call's current state.
    #[error("invalid call state: {0}")]
    InvalidCallState(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

impl BillingError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::LockContention { .. } | Self::Storage(_))
    }
}
