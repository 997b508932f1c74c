//! Wallet ledger.
//!
//! Every balance change goes through [`Ledger::post`]: take the wallet's
//! lock, read the wallet, validate, then commit the new wallet state and its
//! ledger entry in one store write. Lock timeouts and version conflicts
//! surface as `LockContention` and are retried with exponential backoff
//! before being returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;

use callmeter_core::{
    BillingError, EntryId, EntryKind, EntryReference, LedgerEntry, PaymentRecord, Result, UserId,
    Wallet, WalletId,
};
use callmeter_store::{Store, StoreError};

use crate::locks::KeyedLocks;
use crate::notify::{LowBalanceAlert, LowBalanceNotifier};

/// Largest page `list_transactions` returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// Lock and retry settings.
#[derive(Debug, Clone, Copy)]
pub struct LedgerConfig {
    /// How long one attempt waits for the wallet lock.
    pub lock_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// First backoff; doubles per retry.
    pub initial_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2000),
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(2000),
        }
    }
}

/// One requested balance change.
#[derive(Debug, Clone)]
pub struct Posting {
    /// Entry kind; decides the direction.
    pub kind: EntryKind,
    /// Unsigned amount.
    pub amount: Decimal,
    /// Free-text description stored on the entry.
    pub description: String,
    /// The event that caused the change.
    pub reference: Option<EntryReference>,
}

impl Posting {
    /// Build a posting.
    #[must_use]
    pub fn new(
        kind: EntryKind,
        amount: Decimal,
        description: impl Into<String>,
        reference: Option<EntryReference>,
    ) -> Self {
        Self {
            kind,
            amount,
            description: description.into(),
            reference,
        }
    }
}

/// Result of a posting.
#[derive(Debug, Clone)]
pub struct Posted {
    /// The committed entry, or the earlier entry with the same reference.
    pub entry: LedgerEntry,
    /// Wallet state after the entry.
    pub wallet: Wallet,
    /// `false` when an earlier entry with the same reference was returned.
    pub applied: bool,
}

/// One page of ledger history.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    /// Entries, newest first.
    pub transactions: Vec<LedgerEntry>,
    /// Whether more entries follow.
    pub has_more: bool,
    /// Page size used.
    pub limit: usize,
    /// Entries skipped.
    pub offset: usize,
}

/// Validate a posting against a wallet and commit it.
///
/// Runs under the wallet lock. `payment`, when given, is written in the same
/// store batch as the entry.
pub(crate) fn apply_posting(
    store: &dyn Store,
    wallet: &Wallet,
    posting: &Posting,
    payment: Option<&PaymentRecord>,
) -> Result<(Wallet, LedgerEntry)> {
    let entry = LedgerEntry::new(
        wallet,
        posting.kind,
        posting.amount,
        posting.description.clone(),
        posting.reference.clone(),
    );

    if posting.amount.is_sign_negative() || entry.amount.is_zero() {
        return Err(BillingError::InvalidAmount(format!(
            "amount must be positive: {}",
            posting.amount
        )));
    }

    if posting.kind.is_debit() && !wallet.has_sufficient_funds(entry.amount) {
        return Err(BillingError::InsufficientFunds {
            required: entry.amount,
            available: wallet.balance,
        });
    }

    if !entry.reconciles() {
        return Err(BillingError::InvalidAmount(format!(
            "entry does not reconcile: {} -> {}",
            entry.balance_before, entry.balance_after
        )));
    }

    let next = wallet.with_entry(&entry);
    store.commit_entry(&next, &entry, payment)?;
    Ok((next, entry))
}

/// The wallet ledger.
pub struct Ledger {
    store: Arc<dyn Store>,
    locks: KeyedLocks<WalletId>,
    config: LedgerConfig,
    notifier: Arc<dyn LowBalanceNotifier>,
}

impl Ledger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        config: LedgerConfig,
        notifier: Arc<dyn LowBalanceNotifier>,
    ) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            config,
            notifier,
        }
    }

    // =========================================================================
    // Wallets
    // =========================================================================

    /// Create a user's wallet.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the user already has a wallet.
    pub fn create_wallet(&self, user_id: UserId, currency: Option<&str>) -> Result<Wallet> {
        let wallet = Wallet::new(user_id, currency);
        self.store.create_wallet(&wallet).map_err(|e| match e {
            StoreError::AlreadyExists(_) => {
                BillingError::AlreadyExists(format!("wallet for user {user_id}"))
            }
            other => other.into(),
        })?;

        tracing::info!(
            user_id = %user_id,
            wallet_id = %wallet.id,
            currency = %wallet.currency,
            "Wallet created"
        );
        Ok(wallet)
    }

    /// Get a wallet by id.
    ///
    /// # Errors
    ///
    /// Returns `WalletNotFound` if it doesn't exist.
    pub fn get_wallet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        self.store
            .get_wallet(wallet_id)?
            .ok_or_else(|| BillingError::WalletNotFound(wallet_id.to_string()))
    }

    /// Get the wallet owned by a user.
    ///
    /// # Errors
    ///
    /// Returns `WalletNotFound` if the user has none.
    pub fn wallet_for_user(&self, user_id: &UserId) -> Result<Wallet> {
        self.store
            .get_wallet_by_user(user_id)?
            .ok_or_else(|| BillingError::WalletNotFound(format!("user {user_id}")))
    }

    /// Current balance of a user's wallet.
    ///
    /// # Errors
    ///
    /// Returns `WalletNotFound` if the user has none.
    pub fn get_balance(&self, user_id: &UserId) -> Result<Decimal> {
        self.wallet_for_user(user_id).map(|wallet| wallet.balance)
    }

    /// Change auto-recharge settings and, optionally, the low-balance threshold.
    ///
    /// # Errors
    ///
    /// - `WalletNotFound` if the user has no wallet.
    /// - `InvalidAmount` for a non-positive recharge amount or negative threshold.
    pub async fn update_auto_recharge(
        &self,
        user_id: &UserId,
        enabled: bool,
        amount: Option<Decimal>,
        threshold: Option<Decimal>,
    ) -> Result<Wallet> {
        if enabled && amount.map_or(true, |a| a <= Decimal::ZERO) {
            return Err(BillingError::InvalidAmount(
                "auto-recharge requires a positive amount".into(),
            ));
        }
        if threshold.is_some_and(|t| t.is_sign_negative()) {
            return Err(BillingError::InvalidAmount(
                "low-balance threshold cannot be negative".into(),
            ));
        }

        let wallet_id = self.wallet_for_user(user_id)?.id;
        let wallet = self
            .with_wallet(&wallet_id, |store, mut wallet| {
                wallet.auto_recharge.enabled = enabled;
                wallet.auto_recharge.amount = amount;
                if let Some(threshold) = threshold {
                    wallet.low_balance_threshold = callmeter_core::round_money(threshold);
                }
                wallet.updated_at = chrono::Utc::now();
                store.update_wallet_settings(&wallet)?;
                Ok(wallet)
            })
            .await?;

        tracing::info!(
            wallet_id = %wallet.id,
            enabled,
            amount = ?amount,
            threshold = %wallet.low_balance_threshold,
            "Auto-recharge updated"
        );
        Ok(wallet)
    }

    // =========================================================================
    // Postings
    // =========================================================================

    /// Run `op` against the current wallet state under the wallet lock.
    ///
    /// `op` must not block; it runs while other writers of the wallet wait.
    /// Lock timeouts and version conflicts are retried.
    pub(crate) async fn with_wallet<T, F>(&self, wallet_id: &WalletId, mut op: F) -> Result<T>
    where
        F: FnMut(&dyn Store, Wallet) -> Result<T>,
    {
        let mut attempt = 0;
        let mut backoff = self.config.initial_backoff;

        loop {
            let outcome = match self
                .locks
                .lock_timeout(wallet_id, self.config.lock_timeout)
                .await
            {
                Some(_guard) => {
                    let wallet = self.get_wallet(wallet_id)?;
                    op(self.store.as_ref(), wallet)
                }
                None => Err(BillingError::LockContention {
                    wallet_id: wallet_id.to_string(),
                }),
            };

            match outcome {
                Err(e @ BillingError::LockContention { .. }) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        tracing::warn!(
                            wallet_id = %wallet_id,
                            attempt = %attempt,
                            "Ledger busy after max retries"
                        );
                        return Err(e);
                    }

                    tracing::debug!(
                        wallet_id = %wallet_id,
                        attempt = %attempt,
                        backoff_ms = %backoff.as_millis(),
                        "Ledger busy, retrying"
                    );
                    tokio::time::sleep(backoff).await;

                    // Exponential backoff with cap
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
                other => return other,
            }
        }
    }

    /// Apply a posting. With `once`, a posting whose reference already has an
    /// entry of the same kind returns that entry instead of applying again.
    async fn post(&self, wallet_id: &WalletId, posting: &Posting, once: bool) -> Result<Posted> {
        let posted = self
            .with_wallet(wallet_id, |store, wallet| {
                if once {
                    if let Some(existing) = find_existing(store, &wallet, posting)? {
                        return Ok(Posted {
                            entry: existing,
                            wallet,
                            applied: false,
                        });
                    }
                }

                match apply_posting(store, &wallet, posting, None) {
                    Ok((wallet, entry)) => Ok(Posted {
                        entry,
                        wallet,
                        applied: true,
                    }),
                    // Another process committed the same reference first.
                    Err(BillingError::AlreadyExists(_)) if once => {
                        let existing = find_existing(store, &wallet, posting)?.ok_or_else(|| {
                            BillingError::Storage("reference index out of sync".into())
                        })?;
                        Ok(Posted {
                            entry: existing,
                            wallet,
                            applied: false,
                        })
                    }
                    Err(e) => Err(e),
                }
            })
            .await;

        match &posted {
            Ok(posted) if posted.applied => {
                tracing::info!(
                    wallet_id = %wallet_id,
                    entry_id = %posted.entry.id,
                    kind = %posted.entry.kind,
                    amount = %posted.entry.amount,
                    balance = %posted.entry.balance_after,
                    reference = ?posted.entry.reference,
                    "Ledger entry committed"
                );
                if posted.entry.kind.is_debit() {
                    self.emit_low_balance(&posted.wallet, posted.entry.id);
                }
            }
            Ok(posted) => {
                tracing::info!(
                    wallet_id = %wallet_id,
                    entry_id = %posted.entry.id,
                    reference = ?posted.entry.reference,
                    "Posting already applied"
                );
            }
            Err(BillingError::InsufficientFunds {
                required,
                available,
            }) => {
                tracing::warn!(
                    wallet_id = %wallet_id,
                    required = %required,
                    available = %available,
                    "Insufficient funds"
                );
            }
            Err(_) => {}
        }

        posted
    }

    /// Add funds to a wallet.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` for a debit kind or a non-positive amount.
    /// - `WalletNotFound` if the wallet doesn't exist.
    /// - `LockContention` if the wallet stayed busy through every retry.
    pub async fn credit(&self, wallet_id: &WalletId, posting: &Posting) -> Result<LedgerEntry> {
        ensure_direction(posting, true)?;
        self.post(wallet_id, posting, false)
            .await
            .map(|posted| posted.entry)
    }

    /// Remove funds from a wallet.
    ///
    /// # Errors
    ///
    /// - `InsufficientFunds` if the balance does not cover the amount; the
    ///   wallet is left untouched.
    /// - `InvalidAmount` for a credit kind or a non-positive amount.
    /// - `WalletNotFound` if the wallet doesn't exist.
    /// - `LockContention` if the wallet stayed busy through every retry.
    pub async fn debit(&self, wallet_id: &WalletId, posting: &Posting) -> Result<LedgerEntry> {
        ensure_direction(posting, false)?;
        self.post(wallet_id, posting, false)
            .await
            .map(|posted| posted.entry)
    }

    /// Debit at most once per reference.
    ///
    /// # Errors
    ///
    /// Same as [`Ledger::debit`]; the posting must carry a reference.
    pub async fn debit_once(&self, wallet_id: &WalletId, posting: &Posting) -> Result<Posted> {
        ensure_direction(posting, false)?;
        ensure_reference(posting)?;
        self.post(wallet_id, posting, true).await
    }

    /// Credit at most once per reference.
    ///
    /// # Errors
    ///
    /// Same as [`Ledger::credit`]; the posting must carry a reference.
    pub async fn credit_once(&self, wallet_id: &WalletId, posting: &Posting) -> Result<Posted> {
        ensure_direction(posting, true)?;
        ensure_reference(posting)?;
        self.post(wallet_id, posting, true).await
    }

    fn emit_low_balance(&self, wallet: &Wallet, entry_id: EntryId) {
        if !wallet.is_below_threshold() {
            return;
        }

        let alert = LowBalanceAlert::new(wallet, entry_id);
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&alert).await {
                tracing::warn!(
                    wallet_id = %alert.wallet_id,
                    error = %e,
                    "Failed to deliver low-balance alert"
                );
            }
        });
    }

    // =========================================================================
    // History
    // =========================================================================

    /// List a user's ledger entries, newest first.
    ///
    /// `limit` is clamped to `1..=100`.
    ///
    /// # Errors
    ///
    /// Returns `WalletNotFound` if the user has no wallet.
    pub fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<TransactionPage> {
        let wallet = self.wallet_for_user(user_id)?;
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let mut transactions = self.store.list_entries(&wallet.id, limit + 1, offset)?;
        let has_more = transactions.len() > limit;
        transactions.truncate(limit);

        Ok(TransactionPage {
            transactions,
            has_more,
            limit,
            offset,
        })
    }

    /// Get one of a user's ledger entries.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` if the entry doesn't exist or belongs to
    /// another user.
    pub fn get_transaction(&self, user_id: &UserId, entry_id: &EntryId) -> Result<LedgerEntry> {
        self.store
            .get_entry(entry_id)?
            .filter(|entry| entry.user_id == *user_id)
            .ok_or_else(|| BillingError::TransactionNotFound(entry_id.to_string()))
    }

    /// Find the entry of `kind` committed for a reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn find_by_reference(
        &self,
        wallet_id: &WalletId,
        kind: EntryKind,
        reference: &EntryReference,
    ) -> Result<Option<LedgerEntry>> {
        Ok(self
            .store
            .find_entry_by_reference(wallet_id, kind, reference)?)
    }
}

fn find_existing(
    store: &dyn Store,
    wallet: &Wallet,
    posting: &Posting,
) -> Result<Option<LedgerEntry>> {
    match &posting.reference {
        Some(reference) => Ok(store.find_entry_by_reference(&wallet.id, posting.kind, reference)?),
        None => Ok(None),
    }
}

fn ensure_direction(posting: &Posting, credit: bool) -> Result<()> {
    if posting.kind.is_credit() == credit {
        Ok(())
    } else {
        Err(BillingError::InvalidAmount(format!(
            "{} is not a {} entry kind",
            posting.kind,
            if credit { "credit" } else { "debit" }
        )))
    }
}

fn ensure_reference(posting: &Posting) -> Result<()> {
    if posting.reference.is_some() {
        Ok(())
    } else {
        Err(BillingError::InvalidAmount(
            "idempotent postings require a reference".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use callmeter_core::{replay, CallId, PaymentId};
    use callmeter_store::MemoryStore;
    use std::str::FromStr;
    use tokio::sync::mpsc;

    use crate::notify::{LogNotifier, NotifyError};

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ledger() -> (Ledger, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), LedgerConfig::default(), Arc::new(LogNotifier));
        (ledger, store)
    }

    async fn funded(ledger: &Ledger, amount: &str) -> Wallet {
        let wallet = ledger.create_wallet(UserId::generate(), None).unwrap();
        ledger
            .credit(
                &wallet.id,
                &Posting::new(EntryKind::Bonus, dec(amount), "seed", None),
            )
            .await
            .unwrap();
        ledger.get_wallet(&wallet.id).unwrap()
    }

    fn charge(amount: &str) -> Posting {
        Posting::new(EntryKind::Deduction, dec(amount), "call", None)
    }

    #[tokio::test]
    async fn debit_and_credit_reconcile() {
        let (ledger, store) = ledger();
        let wallet = funded(&ledger, "10").await;

        let entry = ledger.debit(&wallet.id, &charge("2.5")).await.unwrap();
        assert_eq!(entry.balance_before, dec("10"));
        assert_eq!(entry.balance_after, dec("7.5"));

        let wallet = ledger.get_wallet(&wallet.id).unwrap();
        assert_eq!(wallet.balance, dec("7.5"));
        assert_eq!(wallet.total_spent, dec("2.5"));

        let entries = store.list_entries(&wallet.id, 100, 0).unwrap();
        assert_eq!(replay(&entries), wallet.balance);
    }

    #[tokio::test]
    async fn insufficient_funds_leaves_wallet_untouched() {
        let (ledger, store) = ledger();
        let wallet = funded(&ledger, "1").await;

        let result = ledger.debit(&wallet.id, &charge("1.0001")).await;
        match result {
            Err(BillingError::InsufficientFunds {
                required,
                available,
            }) => {
                assert_eq!(required, dec("1.0001"));
                assert_eq!(available, dec("1"));
            }
            other => panic!("expected insufficient funds, got {other:?}"),
        }

        let after = ledger.get_wallet(&wallet.id).unwrap();
        assert_eq!(after, wallet);
        assert_eq!(store.list_entries(&wallet.id, 100, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exact_balance_can_be_spent() {
        let (ledger, _) = ledger();
        let wallet = funded(&ledger, "3").await;
        ledger.debit(&wallet.id, &charge("3")).await.unwrap();
        assert_eq!(ledger.get_wallet(&wallet.id).unwrap().balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn direction_and_amount_are_validated() {
        let (ledger, _) = ledger();
        let wallet = funded(&ledger, "3").await;

        assert!(matches!(
            ledger.credit(&wallet.id, &charge("1")).await,
            Err(BillingError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.debit(&wallet.id, &charge("0")).await,
            Err(BillingError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.debit(&wallet.id, &charge("-1")).await,
            Err(BillingError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.debit(&WalletId::generate(), &charge("1")).await,
            Err(BillingError::WalletNotFound(_))
        ));
    }

    #[tokio::test]
    async fn debit_once_applies_a_reference_once() {
        let (ledger, store) = ledger();
        let wallet = funded(&ledger, "5").await;
        let reference = EntryReference::call(CallId::generate());
        let posting = Posting::new(EntryKind::Deduction, dec("1"), "call", Some(reference));

        let first = ledger.debit_once(&wallet.id, &posting).await.unwrap();
        let second = ledger.debit_once(&wallet.id, &posting).await.unwrap();

        assert!(first.applied);
        assert!(!second.applied);
        assert_eq!(first.entry.id, second.entry.id);
        assert_eq!(ledger.get_wallet(&wallet.id).unwrap().balance, dec("4"));
        assert_eq!(store.list_entries(&wallet.id, 100, 0).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn once_requires_a_reference() {
        let (ledger, _) = ledger();
        let wallet = funded(&ledger, "5").await;
        assert!(ledger.debit_once(&wallet.id, &charge("1")).await.is_err());
    }

    #[tokio::test]
    async fn refund_of_same_reference_is_separate_from_debit() {
        let (ledger, _) = ledger();
        let wallet = funded(&ledger, "5").await;
        let reference = EntryReference::call(CallId::generate());

        ledger
            .debit_once(
                &wallet.id,
                &Posting::new(EntryKind::Deduction, dec("2"), "call", Some(reference.clone())),
            )
            .await
            .unwrap();
        let refund = ledger
            .credit_once(
                &wallet.id,
                &Posting::new(EntryKind::Refund, dec("2"), "refund", Some(reference)),
            )
            .await
            .unwrap();

        assert!(refund.applied);
        let wallet = ledger.get_wallet(&wallet.id).unwrap();
        assert_eq!(wallet.balance, dec("5"));
        assert_eq!(wallet.total_spent, Decimal::ZERO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_debits_never_overdraw() {
        let (ledger, store) = ledger();
        let ledger = Arc::new(ledger);
        let wallet = funded(&ledger, "10").await;

        let mut tasks = Vec::new();
        for _ in 0..25 {
            let ledger = ledger.clone();
            let wallet_id = wallet.id;
            tasks.push(tokio::spawn(async move {
                ledger.debit(&wallet_id, &charge("1")).await
            }));
        }

        let mut succeeded = 0;
        let mut refused = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(BillingError::InsufficientFunds { .. }) => refused += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(refused, 15);

        let wallet = ledger.get_wallet(&wallet.id).unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
        let entries = store.list_entries(&wallet.id, 100, 0).unwrap();
        assert_eq!(entries.len(), 11);
        assert_eq!(replay(&entries), Decimal::ZERO);
        assert!(entries.iter().all(LedgerEntry::reconciles));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_credits_and_debits_reconcile() {
        let (ledger, store) = ledger();
        let ledger = Arc::new(ledger);
        let wallet = funded(&ledger, "5").await;

        let mut tasks = Vec::new();
        for i in 0..40 {
            let ledger = ledger.clone();
            let wallet_id = wallet.id;
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    ledger
                        .credit(
                            &wallet_id,
                            &Posting::new(
                                EntryKind::Topup,
                                Decimal::ONE,
                                "top-up",
                                Some(EntryReference::payment(PaymentId::generate())),
                            ),
                        )
                        .await
                        .map(|_| ())
                } else {
                    match ledger.debit(&wallet_id, &charge("0.75")).await {
                        Ok(_) | Err(BillingError::InsufficientFunds { .. }) => Ok(()),
                        Err(e) => Err(e),
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let wallet = ledger.get_wallet(&wallet.id).unwrap();
        let entries = store.list_entries(&wallet.id, 1000, 0).unwrap();
        assert_eq!(replay(&entries), wallet.balance);
        assert!(wallet.balance >= Decimal::ZERO);
        assert!(entries.iter().all(LedgerEntry::reconciles));
    }

    #[tokio::test]
    async fn busy_wallet_reports_lock_contention() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = LedgerConfig {
            lock_timeout: Duration::from_millis(10),
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let ledger = Ledger::new(store, config, Arc::new(LogNotifier));
        let wallet = funded(&ledger, "5").await;

        let _held = ledger.locks.lock(&wallet.id).await;
        let result = ledger.debit(&wallet.id, &charge("1")).await;
        assert!(matches!(result, Err(BillingError::LockContention { .. })));
    }

    struct ChannelNotifier(mpsc::UnboundedSender<LowBalanceAlert>);

    #[async_trait]
    impl LowBalanceNotifier for ChannelNotifier {
        async fn notify(&self, alert: &LowBalanceAlert) -> std::result::Result<(), NotifyError> {
            let _ = self.0.send(alert.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn low_balance_alert_after_debit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store, LedgerConfig::default(), Arc::new(ChannelNotifier(tx)));
        let wallet = funded(&ledger, "12").await;

        ledger.debit(&wallet.id, &charge("1")).await.unwrap();
        assert!(rx.try_recv().is_err());

        let entry = ledger.debit(&wallet.id, &charge("2")).await.unwrap();
        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.wallet_id, wallet.id);
        assert_eq!(alert.balance, dec("9"));
        assert_eq!(alert.entry_id, entry.id);
    }

    #[tokio::test]
    async fn history_pages_newest_first() {
        let (ledger, _) = ledger();
        let wallet = funded(&ledger, "10").await;
        for _ in 0..4 {
            ledger.debit(&wallet.id, &charge("1")).await.unwrap();
        }

        let page = ledger.list_transactions(&wallet.user_id, 3, 0).unwrap();
        assert_eq!(page.transactions.len(), 3);
        assert!(page.has_more);
        assert_eq!(page.transactions[0].balance_after, dec("6"));

        let rest = ledger.list_transactions(&wallet.user_id, 3, 3).unwrap();
        assert_eq!(rest.transactions.len(), 2);
        assert!(!rest.has_more);

        let capped = ledger.list_transactions(&wallet.user_id, 10_000, 0).unwrap();
        assert_eq!(capped.limit, MAX_PAGE_SIZE);
    }

    #[tokio::test]
    async fn transactions_are_owner_scoped() {
        let (ledger, _) = ledger();
        let wallet = funded(&ledger, "10").await;
        let entry = ledger.debit(&wallet.id, &charge("1")).await.unwrap();

        assert_eq!(
            ledger.get_transaction(&wallet.user_id, &entry.id).unwrap().id,
            entry.id
        );
        assert!(matches!(
            ledger.get_transaction(&UserId::generate(), &entry.id),
            Err(BillingError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_wallet_is_rejected() {
        let (ledger, _) = ledger();
        let user = UserId::generate();
        ledger.create_wallet(user, Some("eur")).unwrap();
        assert_eq!(ledger.wallet_for_user(&user).unwrap().currency, "EUR");
        assert!(matches!(
            ledger.create_wallet(user, None),
            Err(BillingError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn auto_recharge_settings() {
        let (ledger, _) = ledger();
        let wallet = funded(&ledger, "10").await;

        let updated = ledger
            .update_auto_recharge(&wallet.user_id, true, Some(dec("25")), Some(dec("5")))
            .await
            .unwrap();
        assert!(updated.auto_recharge.enabled);
        assert_eq!(updated.auto_recharge.amount, Some(dec("25")));
        assert_eq!(updated.low_balance_threshold, dec("5"));
        assert_eq!(updated.balance, dec("10"));

        assert!(ledger
            .update_auto_recharge(&wallet.user_id, true, None, None)
            .await
            .is_err());
    }
}
