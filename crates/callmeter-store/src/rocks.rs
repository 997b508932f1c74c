//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Compound writes go through one `WriteBatch`; read-check-write sequences
//! additionally hold a process-wide commit mutex so the check cannot race.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use callmeter_core::{
    AgentId, AgentProfile, CallId, CallRecord, EntryId, EntryKind, EntryReference, LedgerEntry,
    PaymentId, PaymentRecord, RateId, RateRecord, UserId, Wallet, WalletId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{check_version, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    commit_lock: Mutex<()>,
}

fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read and decode one record.
    fn get_value<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Read an index value holding a 16-byte id.
    fn get_index(&self, cf_name: &str, key: &[u8]) -> Result<Option<[u8; 16]>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_err)?
            .map(|bytes| keys::id_bytes(&bytes))
            .transpose()
    }

    /// Collect index keys under `prefix`, newest (highest key) first, after skipping `offset`.
    fn scan_prefix_rev(
        &self,
        cf_name: &str,
        prefix: &[u8],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }

        // Reverse to get newest first
        all_keys.reverse();
        Ok(all_keys.into_iter().skip(offset).take(limit).collect())
    }

    fn stage_call(&self, batch: &mut WriteBatch, call: &CallRecord) -> Result<()> {
        let cf_calls = self.cf(cf::CALLS)?;
        let cf_by_user = self.cf(cf::CALLS_BY_USER)?;
        let cf_active = self.cf(cf::ACTIVE_CALLS)?;

        let key = keys::call_key(&call.id);
        batch.put_cf(&cf_calls, &key, Self::serialize(call)?);
        batch.put_cf(
            &cf_by_user,
            keys::user_call_key(&call.user_id, call.started_at, &call.id),
            [],
        );
        if call.state.is_terminal() {
            batch.delete_cf(&cf_active, &key);
        } else {
            batch.put_cf(&cf_active, &key, []);
        }
        Ok(())
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Wallet Operations
    // =========================================================================

    fn create_wallet(&self, wallet: &Wallet) -> Result<()> {
        let _guard = self.commit_lock.lock();
        let user_key = keys::user_wallet_key(&wallet.user_id);
        if self.get_index(cf::WALLETS_BY_USER, &user_key)?.is_some() {
            return Err(StoreError::AlreadyExists(format!(
                "wallet for user {}",
                wallet.user_id
            )));
        }

        let cf_wallets = self.cf(cf::WALLETS)?;
        let cf_by_user = self.cf(cf::WALLETS_BY_USER)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_wallets, keys::wallet_key(&wallet.id), Self::serialize(wallet)?);
        batch.put_cf(&cf_by_user, user_key, wallet.id.as_bytes());

        self.db.write(batch).map_err(db_err)
    }

    fn update_wallet_settings(&self, wallet: &Wallet) -> Result<()> {
        let _guard = self.commit_lock.lock();
        let key = keys::wallet_key(&wallet.id);
        let stored: Wallet = self
            .get_value(cf::WALLETS, &key)?
            .ok_or_else(|| StoreError::NotFound(format!("wallet {}", wallet.id)))?;
        if stored.version != wallet.version {
            return Err(StoreError::Conflict {
                wallet_id: wallet.id.to_string(),
                expected: wallet.version,
                found: stored.version,
            });
        }

        let cf = self.cf(cf::WALLETS)?;
        self.db
            .put_cf(&cf, key, Self::serialize(wallet)?)
            .map_err(db_err)
    }

    fn get_wallet(&self, wallet_id: &WalletId) -> Result<Option<Wallet>> {
        self.get_value(cf::WALLETS, &keys::wallet_key(wallet_id))
    }

    fn get_wallet_by_user(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        match self.get_index(cf::WALLETS_BY_USER, &keys::user_wallet_key(user_id))? {
            Some(bytes) => self.get_wallet(&WalletId::from_bytes(bytes)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    fn commit_entry(
        &self,
        wallet: &Wallet,
        entry: &LedgerEntry,
        payment: Option<&PaymentRecord>,
    ) -> Result<()> {
        let _guard = self.commit_lock.lock();

        let wallet_key = keys::wallet_key(&wallet.id);
        let stored: Wallet = self
            .get_value(cf::WALLETS, &wallet_key)?
            .ok_or_else(|| StoreError::NotFound(format!("wallet {}", wallet.id)))?;
        check_version(&stored, wallet)?;

        let reference_key = entry
            .reference
            .as_ref()
            .map(|reference| keys::reference_key(&wallet.id, entry.kind, reference));
        if let Some(key) = &reference_key {
            if self.get_index(cf::ENTRIES_BY_REFERENCE, key)?.is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "{} entry for {}",
                    entry.kind,
                    entry.reference.as_ref().map(ToString::to_string).unwrap_or_default()
                )));
            }
        }
        if let Some(payment) = payment {
            if self.get_payment(&payment.id)?.is_none() {
                return Err(StoreError::NotFound(format!("payment {}", payment.id)));
            }
        }

        let cf_wallets = self.cf(cf::WALLETS)?;
        let cf_entries = self.cf(cf::ENTRIES)?;
        let cf_by_wallet = self.cf(cf::ENTRIES_BY_WALLET)?;
        let cf_by_reference = self.cf(cf::ENTRIES_BY_REFERENCE)?;
        let cf_payments = self.cf(cf::PAYMENTS)?;

        // Write atomically
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_wallets, &wallet_key, Self::serialize(wallet)?);
        batch.put_cf(&cf_entries, keys::entry_key(&entry.id), Self::serialize(entry)?);
        batch.put_cf(&cf_by_wallet, keys::wallet_entry_key(&wallet.id, &entry.id), []);
        if let Some(key) = reference_key {
            batch.put_cf(&cf_by_reference, key, entry.id.to_bytes());
        }
        if let Some(payment) = payment {
            batch.put_cf(&cf_payments, keys::payment_key(&payment.id), Self::serialize(payment)?);
        }

        self.db.write(batch).map_err(db_err)
    }

    fn get_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        self.get_value(cf::ENTRIES, &keys::entry_key(entry_id))
    }

    fn find_entry_by_reference(
        &self,
        wallet_id: &WalletId,
        kind: EntryKind,
        reference: &EntryReference,
    ) -> Result<Option<LedgerEntry>> {
        let key = keys::reference_key(wallet_id, kind, reference);
        match self.get_index(cf::ENTRIES_BY_REFERENCE, &key)? {
            Some(bytes) => self.get_entry(&EntryId::from_bytes(bytes)),
            None => Ok(None),
        }
    }

    fn list_entries(
        &self,
        wallet_id: &WalletId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let prefix = keys::id_prefix(wallet_id.as_bytes());
        let mut entries = Vec::new();
        for key in self.scan_prefix_rev(cf::ENTRIES_BY_WALLET, &prefix, limit, offset)? {
            if let Some(entry) = self.get_entry(&keys::extract_entry_id(&key)?)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    // =========================================================================
    // Rate Operations
    // =========================================================================

    fn put_rates(&self, rates: &[RateRecord]) -> Result<()> {
        let cf = self.cf(cf::RATES)?;
        let mut batch = WriteBatch::default();
        for rate in rates {
            batch.put_cf(&cf, keys::rate_key(&rate.id), Self::serialize(rate)?);
        }
        self.db.write(batch).map_err(db_err)
    }

    fn get_rate(&self, rate_id: &RateId) -> Result<Option<RateRecord>> {
        self.get_value(cf::RATES, &keys::rate_key(rate_id))
    }

    fn list_rates(&self) -> Result<Vec<RateRecord>> {
        let cf = self.cf(cf::RATES)?;
        let mut rates: Vec<RateRecord> = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(db_err)?;
            rates.push(Self::deserialize(&value)?);
        }
        rates.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rates)
    }

    // =========================================================================
    // Call Operations
    // =========================================================================

    fn put_call(&self, call: &CallRecord) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_call(&mut batch, call)?;
        self.db.write(batch).map_err(db_err)
    }

    fn get_call(&self, call_id: &CallId) -> Result<Option<CallRecord>> {
        self.get_value(cf::CALLS, &keys::call_key(call_id))
    }

    fn list_calls_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CallRecord>> {
        let prefix = keys::id_prefix(user_id.as_bytes());
        let mut calls = Vec::new();
        for key in self.scan_prefix_rev(cf::CALLS_BY_USER, &prefix, limit, offset)? {
            if let Some(call) = self.get_call(&keys::extract_call_id(&key)?)? {
                calls.push(call);
            }
        }
        Ok(calls)
    }

    fn list_active_calls(&self) -> Result<Vec<CallRecord>> {
        let cf = self.cf(cf::ACTIVE_CALLS)?;
        let mut calls = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item.map_err(db_err)?;
            let call_id = CallId::from_bytes(keys::id_bytes(&key)?);
            if let Some(call) = self.get_call(&call_id)? {
                calls.push(call);
            }
        }
        Ok(calls)
    }

    fn complete_settlement(&self, call: &CallRecord, agent: Option<&AgentProfile>) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_call(&mut batch, call)?;
        if let Some(agent) = agent {
            let cf_agents = self.cf(cf::AGENTS)?;
            batch.put_cf(&cf_agents, keys::agent_key(&agent.agent_id), Self::serialize(agent)?);
        }
        self.db.write(batch).map_err(db_err)
    }

    // =========================================================================
    // Agent Operations
    // =========================================================================

    fn put_agent(&self, agent: &AgentProfile) -> Result<()> {
        let cf = self.cf(cf::AGENTS)?;
        self.db
            .put_cf(&cf, keys::agent_key(&agent.agent_id), Self::serialize(agent)?)
            .map_err(db_err)
    }

    fn get_agent(&self, agent_id: &AgentId) -> Result<Option<AgentProfile>> {
        self.get_value(cf::AGENTS, &keys::agent_key(agent_id))
    }

    // =========================================================================
    // Payment Operations
    // =========================================================================

    fn create_payment(&self, payment: &PaymentRecord) -> Result<()> {
        let _guard = self.commit_lock.lock();
        let reference_key = keys::payment_reference_key(&payment.reference);
        if self.get_index(cf::PAYMENTS_BY_REFERENCE, &reference_key)?.is_some() {
            return Err(StoreError::AlreadyExists(format!(
                "payment reference {}",
                payment.reference
            )));
        }

        let cf_payments = self.cf(cf::PAYMENTS)?;
        let cf_by_reference = self.cf(cf::PAYMENTS_BY_REFERENCE)?;
        let cf_by_user = self.cf(cf::PAYMENTS_BY_USER)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_payments, keys::payment_key(&payment.id), Self::serialize(payment)?);
        batch.put_cf(&cf_by_reference, reference_key, payment.id.as_bytes());
        batch.put_cf(
            &cf_by_user,
            keys::user_payment_key(&payment.user_id, payment.created_at, &payment.id),
            [],
        );

        self.db.write(batch).map_err(db_err)
    }

    fn update_payment(&self, payment: &PaymentRecord) -> Result<()> {
        let _guard = self.commit_lock.lock();
        if self.get_payment(&payment.id)?.is_none() {
            return Err(StoreError::NotFound(format!("payment {}", payment.id)));
        }
        let cf = self.cf(cf::PAYMENTS)?;
        self.db
            .put_cf(&cf, keys::payment_key(&payment.id), Self::serialize(payment)?)
            .map_err(db_err)
    }

    fn get_payment(&self, payment_id: &PaymentId) -> Result<Option<PaymentRecord>> {
        self.get_value(cf::PAYMENTS, &keys::payment_key(payment_id))
    }

    fn get_payment_by_reference(&self, reference: &str) -> Result<Option<PaymentRecord>> {
        let key = keys::payment_reference_key(reference);
        match self.get_index(cf::PAYMENTS_BY_REFERENCE, &key)? {
            Some(bytes) => self.get_payment(&PaymentId::from_bytes(bytes)),
            None => Ok(None),
        }
    }

    fn list_payments_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentRecord>> {
        let prefix = keys::id_prefix(user_id.as_bytes());
        let mut payments = Vec::new();
        for key in self.scan_prefix_rev(cf::PAYMENTS_BY_USER, &prefix, limit, offset)? {
            if let Some(payment) = self.get_payment(&keys::extract_payment_id(&key)?)? {
                payments.push(payment);
            }
        }
        Ok(payments)
    }
}
