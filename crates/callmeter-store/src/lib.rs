//! Storage layer for callmeter.
//!
//! This crate provides persistent storage for wallets, ledger entries, rate
//! records, call records, agent profiles and payments.
//!
//! # Backends
//!
//! - [`MemoryStore`]: always available; used by tests and single-node deployments
//!   that do not need durability.
//! - `RocksStore` (feature `rocksdb-backend`): `RocksDB` with one column family
//!   per record type plus index families, CBOR-encoded values.
//!
//! # Atomicity
//!
//! Every compound method on [`Store`] is all-or-nothing: either every record it
//! names is written or none is. Ledger commits are additionally version
//! checked, so a writer that read a stale wallet gets `StoreError::Conflict`
//! instead of overwriting a newer balance.
//!
//! # Example
//!
//! ```
//! use callmeter_core::{UserId, Wallet};
//! use callmeter_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let wallet = Wallet::new(UserId::generate(), None);
//! store.create_wallet(&wallet).unwrap();
//!
//! let retrieved = store.get_wallet_by_user(&wallet.user_id).unwrap();
//! assert_eq!(retrieved.map(|w| w.id), Some(wallet.id));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use callmeter_core::{
    AgentId, AgentProfile, CallId, CallRecord, EntryId, EntryKind, EntryReference, LedgerEntry,
    PaymentId, PaymentRecord, RateId, RateRecord, UserId, Wallet, WalletId,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Wallet Operations
    // =========================================================================

    /// Insert a new wallet.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the user already owns a wallet.
    fn create_wallet(&self, wallet: &Wallet) -> Result<()>;

    /// Overwrite wallet settings without a ledger entry.
    ///
    /// Callers hold the wallet's ledger lock; the stored version must equal
    /// `wallet.version`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the wallet doesn't exist.
    /// - `StoreError::Conflict` if the stored version differs.
    fn update_wallet_settings(&self, wallet: &Wallet) -> Result<()>;

    /// Get a wallet by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_wallet(&self, wallet_id: &WalletId) -> Result<Option<Wallet>>;

    /// Get the wallet owned by a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_wallet_by_user(&self, user_id: &UserId) -> Result<Option<Wallet>>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Write a ledger entry together with the wallet state it produces.
    ///
    /// `wallet` is the state after the entry; the stored wallet must be at
    /// `wallet.version - 1`. When `payment` is given its record is written in
    /// the same batch.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the wallet doesn't exist.
    /// - `StoreError::Conflict` if the stored version is not the expected one.
    /// - `StoreError::AlreadyExists` if an entry with the same kind and
    ///   reference was already committed for the wallet.
    fn commit_entry(
        &self,
        wallet: &Wallet,
        entry: &LedgerEntry,
        payment: Option<&PaymentRecord>,
    ) -> Result<()>;

    /// Get a ledger entry by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>>;

    /// Find the entry of `kind` a wallet committed for `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_entry_by_reference(
        &self,
        wallet_id: &WalletId,
        kind: EntryKind,
        reference: &EntryReference,
    ) -> Result<Option<LedgerEntry>>;

    /// List entries for a wallet, ordered by time (newest first).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_entries(
        &self,
        wallet_id: &WalletId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    // =========================================================================
    // Rate Operations
    // =========================================================================

    /// Insert or overwrite rate records in one batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_rates(&self, rates: &[RateRecord]) -> Result<()>;

    /// Get a rate record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_rate(&self, rate_id: &RateId) -> Result<Option<RateRecord>>;

    /// List every rate record, active or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_rates(&self) -> Result<Vec<RateRecord>>;

    // =========================================================================
    // Call Operations
    // =========================================================================

    /// Insert or update a call record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_call(&self, call: &CallRecord) -> Result<()>;

    /// Get a call record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_call(&self, call_id: &CallId) -> Result<Option<CallRecord>>;

    /// List a user's calls, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_calls_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CallRecord>>;

    /// List calls that are not yet settled or failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_active_calls(&self) -> Result<Vec<CallRecord>>;

    /// Write a finished call and, when it was charged, the agent's updated
    /// statistics in one batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn complete_settlement(&self, call: &CallRecord, agent: Option<&AgentProfile>) -> Result<()>;

    // =========================================================================
    // Agent Operations
    // =========================================================================

    /// Insert or update an agent billing profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_agent(&self, agent: &AgentProfile) -> Result<()>;

    /// Get an agent billing profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_agent(&self, agent_id: &AgentId) -> Result<Option<AgentProfile>>;

    // =========================================================================
    // Payment Operations
    // =========================================================================

    /// Insert a new payment record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the external reference is taken.
    fn create_payment(&self, payment: &PaymentRecord) -> Result<()>;

    /// Overwrite an existing payment record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the payment doesn't exist.
    fn update_payment(&self, payment: &PaymentRecord) -> Result<()>;

    /// Get a payment by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_payment(&self, payment_id: &PaymentId) -> Result<Option<PaymentRecord>>;

    /// Get a payment by its external reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_payment_by_reference(&self, reference: &str) -> Result<Option<PaymentRecord>>;

    /// List a user's payments, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_payments_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentRecord>>;
}

/// Check that `next` is the direct successor of the stored wallet.
pub(crate) fn check_version(stored: &Wallet, next: &Wallet) -> Result<()> {
    let expected = next.version.saturating_sub(1);
    if stored.version == expected && next.version > 0 {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            wallet_id: next.id.to_string(),
            expected,
            found: stored.version,
        })
    }
}
