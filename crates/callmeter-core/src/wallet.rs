//! Wallet types for callmeter.
//!
//! A wallet holds a user's prepaid balance. It is mutated only by ledger
//! postings, each of which bumps `version` so stores can reject stale writes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::{EntryKind, LedgerEntry};
use crate::money::DEFAULT_CURRENCY;
use crate::{UserId, WalletId};

/// Default low-balance alert threshold (10.0000 in wallet currency).
pub const DEFAULT_LOW_BALANCE_THRESHOLD: Decimal = Decimal::from_parts(100_000, 0, 0, false, 4);

/// A prepaid wallet owned by a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet identifier.
    pub id: WalletId,

    /// The owning user.
    pub user_id: UserId,

    /// Current balance. Never negative.
    pub balance: Decimal,

    /// ISO 4217 currency code.
    pub currency: String,

    /// Lifetime top-ups credited.
    pub total_topped_up: Decimal,

    /// Lifetime call charges, net of refunds.
    pub total_spent: Decimal,

    /// A low-balance alert is emitted when a debit leaves the balance below this.
    pub low_balance_threshold: Decimal,

    /// Auto-recharge preferences, forwarded with low-balance alerts.
    pub auto_recharge: AutoRecharge,

    /// Incremented on every committed ledger posting.
    pub version: u64,

    /// When the wallet was created.
    pub created_at: DateTime<Utc>,

    /// When the wallet was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet for a user.
    #[must_use]
    pub fn new(user_id: UserId, currency: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: WalletId::generate(),
            user_id,
            balance: Decimal::ZERO,
            currency: currency.unwrap_or(DEFAULT_CURRENCY).to_uppercase(),
            total_topped_up: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            low_balance_threshold: DEFAULT_LOW_BALANCE_THRESHOLD,
            auto_recharge: AutoRecharge::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the wallet can cover a debit of `amount`.
    #[must_use]
    pub fn has_sufficient_funds(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    /// Whether the balance sits below the low-balance threshold.
    #[must_use]
    pub fn is_below_threshold(&self) -> bool {
        self.balance < self.low_balance_threshold
    }

    /// Return the wallet state after `entry` is applied.
    ///
    /// The caller is responsible for having validated the entry against this
    /// wallet's balance; the returned state carries a bumped version.
    #[must_use]
    pub fn with_entry(&self, entry: &LedgerEntry) -> Self {
        let mut next = self.clone();
        next.balance = entry.balance_after;
        match entry.kind {
            EntryKind::Topup => next.total_topped_up += entry.amount,
            EntryKind::Deduction => next.total_spent += entry.amount,
            EntryKind::Refund => {
                next.total_spent = (next.total_spent - entry.amount).max(Decimal::ZERO);
            }
            EntryKind::Bonus => {}
        }
        next.version += 1;
        next.updated_at = entry.created_at;
        next
    }
}

/// Auto-recharge configuration.
///
/// The ledger does not charge cards itself; these settings travel with
/// low-balance alerts so the payment collaborator can act on them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoRecharge {
    /// Whether auto-recharge is enabled.
    pub enabled: bool,

    /// Amount to recharge when triggered.
    pub amount: Option<Decimal>,
}
