//! Ledger entry types for callmeter.
//!
//! Every change to a wallet balance produces exactly one immutable ledger
//! entry. Entries store an unsigned magnitude; the entry kind gives direction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::round_money;
use crate::wallet::Wallet;
use crate::{CallId, EntryId, PaymentId, UserId, WalletId};

/// An append-only audit record of one balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (ULID for time-ordering).
    pub id: EntryId,

    /// The wallet whose balance changed.
    pub wallet_id: WalletId,

    /// Owner of the wallet, denormalized for history queries.
    pub user_id: UserId,

    /// Kind of entry; decides the sign of `amount`.
    pub kind: EntryKind,

    /// Unsigned magnitude of the change.
    pub amount: Decimal,

    /// Balance before this entry.
    pub balance_before: Decimal,

    /// Balance after this entry.
    pub balance_after: Decimal,

    /// Human-readable description.
    pub description: String,

    /// The event that caused this entry (a call, a payment, an admin action).
    pub reference: Option<EntryReference>,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build the entry that applies `amount` of `kind` to `wallet`'s current balance.
    ///
    /// `amount` is rounded to the money scale. The caller validates that a
    /// debit does not exceed the balance.
    #[must_use]
    pub fn new(
        wallet: &Wallet,
        kind: EntryKind,
        amount: Decimal,
        description: String,
        reference: Option<EntryReference>,
    ) -> Self {
        let amount = round_money(amount.abs());
        let balance_before = wallet.balance;
        let balance_after = if kind.is_credit() {
            balance_before + amount
        } else {
            balance_before - amount
        };

        Self {
            id: EntryId::generate(),
            wallet_id: wallet.id,
            user_id: wallet.user_id,
            kind,
            amount,
            balance_before,
            balance_after,
            description,
            reference,
            created_at: Utc::now(),
        }
    }

    /// The amount with the sign implied by the entry kind.
    #[must_use]
    pub fn signed_amount(&self) -> Decimal {
        if self.kind.is_credit() {
            self.amount
        } else {
            -self.amount
        }
    }

    /// Whether `balance_after == balance_before + signed_amount` and the result is non-negative.
    #[must_use]
    pub fn reconciles(&self) -> bool {
        self.balance_after == self.balance_before + self.signed_amount()
            && self.balance_after >= Decimal::ZERO
    }
}

/// Sum of signed amounts, i.e. the balance a wallet must hold after replaying `entries`.
pub fn replay<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Decimal {
    entries.into_iter().map(LedgerEntry::signed_amount).sum()
}

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Funds added by a confirmed payment.
    Topup,

    /// Funds removed to settle a call.
    Deduction,

    /// A previous deduction returned to the wallet.
    Refund,

    /// Promotional credit.
    Bonus,
}

impl EntryKind {
    /// Check if this kind adds funds.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(self, Self::Topup | Self::Refund | Self::Bonus)
    }

    /// Check if this kind removes funds.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Deduction)
    }

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Topup => "topup",
            Self::Deduction => "deduction",
            Self::Refund => "refund",
            Self::Bonus => "bonus",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryReference {
    /// Identifier of the causing event.
    pub id: String,

    /// Kind of the causing event.
    pub kind: ReferenceKind,
}

impl EntryReference {
    /// Reference a call.
    #[must_use]
    pub fn call(call_id: CallId) -> Self {
        Self {
            id: call_id.to_string(),
            kind: ReferenceKind::Call,
        }
    }

    /// Reference a top-up payment.
    #[must_use]
    pub fn payment(payment_id: PaymentId) -> Self {
        Self {
            id: payment_id.to_string(),
            kind: ReferenceKind::Payment,
        }
    }

    /// Reference an admin action, identified by the acting admin.
    #[must_use]
    pub fn admin(admin_id: impl Into<String>) -> Self {
        Self {
            id: admin_id.into(),
            kind: ReferenceKind::Admin,
        }
    }
}

impl fmt::Display for EntryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Kind of event a ledger entry references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// A settled call.
    Call,
    /// A top-up payment.
    Payment,
    /// A manual admin adjustment.
    Admin,
}

impl ReferenceKind {
    /// Stable wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Payment => "payment",
            Self::Admin => "admin",
        }
    }
}
