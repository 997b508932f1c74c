//! Top-up intake.
//!
//! A top-up starts as a pending payment record. The payment provider's
//! confirmation, which may be delivered more than once, credits the wallet
//! and marks the payment succeeded in one store batch, under the wallet's
//! ledger lock. A payment that already reached a terminal status is returned
//! unchanged.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use callmeter_core::{
    fits_scale, BillingError, EntryKind, EntryReference, LedgerEntry, PaymentId, PaymentOutcome,
    PaymentRecord, Result, UserId, WalletId, TOPUP_SCALE,
};
use callmeter_store::{Store, StoreError};

use crate::ledger::{apply_posting, Ledger, Posting, MAX_PAGE_SIZE};

/// Accepted top-up amounts.
#[derive(Debug, Clone, Copy)]
pub struct TopupLimits {
    /// Smallest accepted amount.
    pub min: Decimal,
    /// Largest accepted amount.
    pub max: Decimal,
}

impl Default for TopupLimits {
    fn default() -> Self {
        Self {
            min: Decimal::new(500, 2),
            max: Decimal::new(100_000, 2),
        }
    }
}

/// Result of processing a confirmation.
#[derive(Debug, Clone)]
pub struct Confirmation {
    /// The payment after processing.
    pub payment: PaymentRecord,
    /// The top-up entry, when this confirmation credited the wallet.
    pub entry: Option<LedgerEntry>,
    /// Whether the payment was already terminal.
    pub duplicate: bool,
}

/// Creates pending payments and applies provider confirmations.
pub struct TopupIntake {
    store: Arc<dyn Store>,
    ledger: Arc<Ledger>,
    limits: TopupLimits,
}

impl TopupIntake {
    /// Create the intake.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, ledger: Arc<Ledger>, limits: TopupLimits) -> Self {
        Self {
            store,
            ledger,
            limits,
        }
    }

    /// Record a pending top-up for a wallet.
    ///
    /// Without an external `reference` the payment id is used.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` for more than two fractional digits or an amount
    ///   outside the configured bounds.
    /// - `CurrencyMismatch` if `currency` differs from the wallet's.
    /// - `AlreadyExists` if the reference is already used.
    pub fn initiate(
        &self,
        wallet_id: &WalletId,
        amount: Decimal,
        currency: &str,
        reference: Option<String>,
    ) -> Result<PaymentRecord> {
        if !fits_scale(amount, TOPUP_SCALE) {
            return Err(BillingError::InvalidAmount(format!(
                "top-up amounts have at most {TOPUP_SCALE} fractional digits: {amount}"
            )));
        }
        if amount < self.limits.min || amount > self.limits.max {
            return Err(BillingError::InvalidAmount(format!(
                "top-up must be between {} and {}: {amount}",
                self.limits.min, self.limits.max
            )));
        }

        let wallet = self.ledger.get_wallet(wallet_id)?;
        let currency = currency.trim().to_uppercase();
        if currency != wallet.currency {
            return Err(BillingError::CurrencyMismatch {
                expected: wallet.currency,
                actual: currency,
            });
        }

        let reference = reference.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let payment = PaymentRecord::pending(wallet.user_id, wallet.id, amount, currency, reference);
        self.store.create_payment(&payment).map_err(|e| match e {
            StoreError::AlreadyExists(_) => {
                BillingError::AlreadyExists(format!("payment reference {}", payment.reference))
            }
            other => other.into(),
        })?;

        tracing::info!(
            payment_id = %payment.id,
            wallet_id = %wallet.id,
            amount = %amount,
            reference = %payment.reference,
            "Top-up initiated"
        );
        Ok(payment)
    }

    /// Apply the provider's outcome for a payment reference.
    ///
    /// # Errors
    ///
    /// - `PaymentNotFound` if no payment has the reference.
    /// - `LockContention` if the wallet stayed busy; the payment stays pending.
    pub async fn confirm(&self, reference: &str, outcome: PaymentOutcome) -> Result<Confirmation> {
        let payment = self
            .store
            .get_payment_by_reference(reference)?
            .ok_or_else(|| BillingError::PaymentNotFound(reference.to_string()))?;

        if payment.status.is_terminal() {
            tracing::warn!(
                payment_id = %payment.id,
                status = %payment.status,
                "Duplicate payment confirmation ignored"
            );
            return Ok(Confirmation {
                payment,
                entry: None,
                duplicate: true,
            });
        }

        let payment_id = payment.id;
        let confirmation = self
            .ledger
            .with_wallet(&payment.wallet_id, |store, wallet| {
                // Re-read under the lock; a concurrent delivery may have won.
                let current = store
                    .get_payment(&payment_id)?
                    .ok_or_else(|| BillingError::PaymentNotFound(payment_id.to_string()))?;
                if current.status.is_terminal() {
                    return Ok(Confirmation {
                        payment: current,
                        entry: None,
                        duplicate: true,
                    });
                }

                let now = Utc::now();
                match &outcome {
                    PaymentOutcome::Succeeded => {
                        let succeeded = current.succeeded(now);
                        let posting = Posting::new(
                            EntryKind::Topup,
                            current.amount,
                            format!("Top-up of {} {}", current.amount, current.currency),
                            Some(EntryReference::payment(current.id)),
                        );
                        let (_, entry) = apply_posting(store, &wallet, &posting, Some(&succeeded))?;
                        Ok(Confirmation {
                            payment: succeeded,
                            entry: Some(entry),
                            duplicate: false,
                        })
                    }
                    PaymentOutcome::Failed { reason } => {
                        let failed = current.failed(reason.clone(), now);
                        store.update_payment(&failed)?;
                        Ok(Confirmation {
                            payment: failed,
                            entry: None,
                            duplicate: false,
                        })
                    }
                }
            })
            .await?;

        if confirmation.duplicate {
            tracing::warn!(payment_id = %payment_id, "Duplicate payment confirmation ignored");
        } else {
            tracing::info!(
                payment_id = %payment_id,
                status = %confirmation.payment.status,
                amount = %confirmation.payment.amount,
                entry_id = ?confirmation.entry.as_ref().map(|e| e.id),
                "Payment confirmed"
            );
        }
        Ok(confirmation)
    }

    /// Get one of a user's payments.
    ///
    /// # Errors
    ///
    /// Returns `PaymentNotFound` if it doesn't exist or belongs to another user.
    pub fn get_payment(&self, user_id: &UserId, payment_id: &PaymentId) -> Result<PaymentRecord> {
        self.store
            .get_payment(payment_id)?
            .filter(|payment| payment.user_id == *user_id)
            .ok_or_else(|| BillingError::PaymentNotFound(payment_id.to_string()))
    }

    /// List a user's payments, newest first. `limit` is clamped to `1..=100`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list_payments(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentRecord>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        Ok(self.store.list_payments_by_user(user_id, limit, offset)?)
    }
}
