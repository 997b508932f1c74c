//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;

use callmeter_core::BillingError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists or invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The wallet cannot cover the charge.
    #[error("insufficient funds: available={available}, required={required}")]
    InsufficientFunds {
        /// Current balance.
        available: Decimal,
        /// Required amount.
        required: Decimal,
    },

    /// No rate covers a requested service.
    #[error("{0}")]
    PricingNotConfigured(String),

    /// The wallet stayed busy; the request may be retried.
    #[error("service busy: {0}")]
    Busy(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientFunds {
                available,
                required,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_funds",
                self.to_string(),
                Some(serde_json::json!({
                    "available": available,
                    "required": required
                })),
            ),
            Self::PricingNotConfigured(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "pricing_not_configured",
                msg.clone(),
                None,
            ),
            Self::Busy(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_busy",
                msg.clone(),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InsufficientFunds {
                required,
                available,
            } => Self::InsufficientFunds {
                available,
                required,
            },
            e @ BillingError::PricingNotConfigured { .. } => {
                Self::PricingNotConfigured(e.to_string())
            }
            e @ (BillingError::CallAlreadyClosed { .. } | BillingError::AlreadyExists(_)) => {
                Self::Conflict(e.to_string())
            }
            e @ BillingError::LockContention { .. } => Self::Busy(e.to_string()),
            e @ (BillingError::WalletNotFound(_)
            | BillingError::CallNotFound(_)
            | BillingError::AgentNotFound(_)
            | BillingError::PaymentNotFound(_)
            | BillingError::TransactionNotFound(_)
            | BillingError::RateNotFound(_)) => Self::NotFound(e.to_string()),
            e @ (BillingError::InvalidAmount(_)
            | BillingError::InvalidRate(_)
            | BillingError::CurrencyMismatch { .. }
            | BillingError::InvalidCallState(_)
            | BillingError::InvalidId(_)) => Self::BadRequest(e.to_string()),
            BillingError::Storage(msg) => Self::Internal(msg),
        }
    }
}
