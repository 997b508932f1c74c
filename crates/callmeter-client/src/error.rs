//! Client error types.

use rust_decimal::Decimal;

/// Errors that can occur when using the callmeter client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The wallet cannot cover the amount.
    #[error("insufficient funds: available={available}, required={required}")]
    InsufficientFunds {
        /// Wallet balance.
        available: Decimal,
        /// Amount needed.
        required: Decimal,
    },

    /// The call is no longer open.
    #[error("call closed: {0}")]
    CallClosed(String),

    /// No rate is configured for a selected provider.
    #[error("pricing not configured: {0}")]
    PricingNotConfigured(String),

    /// The call, agent or wallet does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service is busy; the request can be retried.
    #[error("service busy: {0}")]
    Busy(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Busy(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
