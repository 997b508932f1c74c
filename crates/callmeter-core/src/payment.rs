//! Top-up payment records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{PaymentId, UserId, WalletId};

/// One attempt to add funds to a wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Payment identifier; also the ledger reference of the resulting top-up.
    pub id: PaymentId,

    /// User who initiated the top-up.
    pub user_id: UserId,

    /// Wallet to credit.
    pub wallet_id: WalletId,

    /// Requested amount.
    pub amount: Decimal,

    /// Currency of the amount; always the wallet currency.
    pub currency: String,

    /// Payment status.
    pub status: PaymentStatus,

    /// External payment-provider reference used to match confirmations.
    pub reference: String,

    /// Provider-supplied failure reason.
    pub failure_reason: Option<String>,

    /// When the top-up was initiated.
    pub created_at: DateTime<Utc>,

    /// When the payment succeeded.
    pub paid_at: Option<DateTime<Utc>>,

    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Create a pending payment. Without an external reference the payment id is used.
    #[must_use]
    pub fn pending(
        user_id: UserId,
        wallet_id: WalletId,
        amount: Decimal,
        currency: String,
        reference: Option<String>,
    ) -> Self {
        let id = PaymentId::generate();
        let now = Utc::now();
        Self {
            id,
            user_id,
            wallet_id,
            amount,
            currency,
            status: PaymentStatus::Pending,
            reference: reference.unwrap_or_else(|| id.to_string()),
            failure_reason: None,
            created_at: now,
            paid_at: None,
            updated_at: now,
        }
    }

    /// The record after a successful confirmation.
    #[must_use]
    pub fn succeeded(&self, at: DateTime<Utc>) -> Self {
        Self {
            status: PaymentStatus::Succeeded,
            paid_at: Some(at),
            updated_at: at,
            ..self.clone()
        }
    }

    /// The record after a failed confirmation.
    #[must_use]
    pub fn failed(&self, reason: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: PaymentStatus::Failed,
            failure_reason: reason,
            updated_at: at,
            ..self.clone()
        }
    }
}

/// Status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Waiting for the provider's confirmation.
    Pending,
    /// Funds were credited.
    Succeeded,
    /// The provider reported a failure.
    Failed,
    /// The provider refunded the payment.
    Refunded,
}

impl PaymentStatus {
    /// Whether confirmations no longer change the record.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome delivered by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The charge went through.
    Succeeded,
    /// The charge failed.
    Failed {
        /// Provider-supplied reason.
        reason: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_payment_defaults_reference_to_id() {
        let payment = PaymentRecord::pending(
            UserId::generate(),
            WalletId::generate(),
            Decimal::new(2000, 2),
            "USD".into(),
            None,
        );
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.reference, payment.id.to_string());
        assert!(!payment.status.is_terminal());
    }

    #[test]
    fn transitions_are_terminal() {
        let payment = PaymentRecord::pending(
            UserId::generate(),
            WalletId::generate(),
            Decimal::new(500, 2),
            "USD".into(),
            Some("pi_123".into()),
        );
        let now = Utc::now();

        let paid = payment.succeeded(now);
        assert_eq!(paid.status, PaymentStatus::Succeeded);
        assert_eq!(paid.paid_at, Some(now));
        assert!(paid.status.is_terminal());

        let failed = payment.failed(Some("card_declined".into()), now);
        assert_eq!(failed.status, PaymentStatus::Failed);
        assert!(failed.paid_at.is_none());
        assert_eq!(failed.reference, "pi_123");
    }
}
