//! In-memory storage implementation.
//!
//! All state sits behind one `RwLock`, so every compound operation is atomic
//! with respect to every other.

use std::collections::HashMap;

use parking_lot::RwLock;

use callmeter_core::{
    AgentId, AgentProfile, CallId, CallRecord, EntryId, EntryKind, EntryReference, LedgerEntry,
    PaymentId, PaymentRecord, RateId, RateRecord, UserId, Wallet, WalletId,
};

use crate::error::{Result, StoreError};
use crate::{check_version, Store};

#[derive(Default)]
struct Inner {
    wallets: HashMap<WalletId, Wallet>,
    wallets_by_user: HashMap<UserId, WalletId>,
    entries: HashMap<EntryId, LedgerEntry>,
    // Commit order, which is chronological per wallet.
    entries_by_wallet: HashMap<WalletId, Vec<EntryId>>,
    entries_by_reference: HashMap<(WalletId, EntryKind, EntryReference), EntryId>,
    rates: HashMap<RateId, RateRecord>,
    calls: HashMap<CallId, CallRecord>,
    agents: HashMap<AgentId, AgentProfile>,
    payments: HashMap<PaymentId, PaymentRecord>,
    payments_by_reference: HashMap<String, PaymentId>,
}

/// Heap-backed storage implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T>(items: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}

impl Store for MemoryStore {
    // =========================================================================
    // Wallet Operations
    // =========================================================================

    fn create_wallet(&self, wallet: &Wallet) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.wallets_by_user.contains_key(&wallet.user_id) {
            return Err(StoreError::AlreadyExists(format!(
                "wallet for user {}",
                wallet.user_id
            )));
        }
        inner.wallets_by_user.insert(wallet.user_id, wallet.id);
        inner.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    fn update_wallet_settings(&self, wallet: &Wallet) -> Result<()> {
        let mut inner = self.inner.write();
        let stored = inner
            .wallets
            .get_mut(&wallet.id)
            .ok_or_else(|| StoreError::NotFound(format!("wallet {}", wallet.id)))?;
        if stored.version != wallet.version {
            return Err(StoreError::Conflict {
                wallet_id: wallet.id.to_string(),
                expected: wallet.version,
                found: stored.version,
            });
        }
        *stored = wallet.clone();
        Ok(())
    }

    fn get_wallet(&self, wallet_id: &WalletId) -> Result<Option<Wallet>> {
        Ok(self.inner.read().wallets.get(wallet_id).cloned())
    }

    fn get_wallet_by_user(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        let inner = self.inner.read();
        Ok(inner
            .wallets_by_user
            .get(user_id)
            .and_then(|id| inner.wallets.get(id))
            .cloned())
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
        let mut inner = self.inner.write();

        let stored = inner
            .wallets
            .get(&wallet.id)
            .ok_or_else(|| StoreError::NotFound(format!("wallet {}", wallet.id)))?;
        check_version(stored, wallet)?;

        let reference_key = entry
            .reference
            .as_ref()
            .map(|reference| (wallet.id, entry.kind, reference.clone()));
        if let Some(key) = &reference_key {
            if inner.entries_by_reference.contains_key(key) {
                return Err(StoreError::AlreadyExists(format!(
                    "{} entry for {}",
                    entry.kind, key.2
                )));
            }
        }
        if let Some(payment) = payment {
            if !inner.payments.contains_key(&payment.id) {
                return Err(StoreError::NotFound(format!("payment {}", payment.id)));
            }
        }

        // Validation done; nothing below can fail.
        inner.wallets.insert(wallet.id, wallet.clone());
        inner.entries.insert(entry.id, entry.clone());
        inner
            .entries_by_wallet
            .entry(wallet.id)
            .or_default()
            .push(entry.id);
        if let Some(key) = reference_key {
            inner.entries_by_reference.insert(key, entry.id);
        }
        if let Some(payment) = payment {
            inner.payments.insert(payment.id, payment.clone());
        }
        Ok(())
    }

    fn get_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        Ok(self.inner.read().entries.get(entry_id).cloned())
    }

    fn find_entry_by_reference(
        &self,
        wallet_id: &WalletId,
        kind: EntryKind,
        reference: &EntryReference,
    ) -> Result<Option<LedgerEntry>> {
        let inner = self.inner.read();
        Ok(inner
            .entries_by_reference
            .get(&(*wallet_id, kind, reference.clone()))
            .and_then(|id| inner.entries.get(id))
            .cloned())
    }

    fn list_entries(
        &self,
        wallet_id: &WalletId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let inner = self.inner.read();
        let Some(ids) = inner.entries_by_wallet.get(wallet_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| inner.entries.get(id).cloned())
            .collect())
    }

    // =========================================================================
    // Rate Operations
    // =========================================================================

    fn put_rates(&self, rates: &[RateRecord]) -> Result<()> {
        let mut inner = self.inner.write();
        for rate in rates {
            inner.rates.insert(rate.id, rate.clone());
        }
        Ok(())
    }

    fn get_rate(&self, rate_id: &RateId) -> Result<Option<RateRecord>> {
        Ok(self.inner.read().rates.get(rate_id).cloned())
    }

    fn list_rates(&self) -> Result<Vec<RateRecord>> {
        let mut rates: Vec<_> = self.inner.read().rates.values().cloned().collect();
        rates.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rates)
    }

    // =========================================================================
    // Call Operations
    // =========================================================================

    fn put_call(&self, call: &CallRecord) -> Result<()> {
        self.inner.write().calls.insert(call.id, call.clone());
        Ok(())
    }

    fn get_call(&self, call_id: &CallId) -> Result<Option<CallRecord>> {
        Ok(self.inner.read().calls.get(call_id).cloned())
    }

    fn list_calls_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CallRecord>> {
        let mut calls: Vec<_> = self
            .inner
            .read()
            .calls
            .values()
            .filter(|call| call.user_id == *user_id)
            .cloned()
            .collect();
        calls.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(page(calls, limit, offset))
    }

    fn list_active_calls(&self) -> Result<Vec<CallRecord>> {
        Ok(self
            .inner
            .read()
            .calls
            .values()
            .filter(|call| !call.state.is_terminal())
            .cloned()
            .collect())
    }

    fn complete_settlement(&self, call: &CallRecord, agent: Option<&AgentProfile>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.calls.insert(call.id, call.clone());
        if let Some(agent) = agent {
            inner.agents.insert(agent.agent_id, agent.clone());
        }
        Ok(())
    }

    // =========================================================================
    // Agent Operations
    // =========================================================================

    fn put_agent(&self, agent: &AgentProfile) -> Result<()> {
        self.inner.write().agents.insert(agent.agent_id, agent.clone());
        Ok(())
    }

    fn get_agent(&self, agent_id: &AgentId) -> Result<Option<AgentProfile>> {
        Ok(self.inner.read().agents.get(agent_id).cloned())
    }

    // =========================================================================
    // Payment Operations
    // =========================================================================

    fn create_payment(&self, payment: &PaymentRecord) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.payments_by_reference.contains_key(&payment.reference) {
            return Err(StoreError::AlreadyExists(format!(
                "payment reference {}",
                payment.reference
            )));
        }
        inner
            .payments_by_reference
            .insert(payment.reference.clone(), payment.id);
        inner.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    fn update_payment(&self, payment: &PaymentRecord) -> Result<()> {
        let mut inner = self.inner.write();
        let stored = inner
            .payments
            .get_mut(&payment.id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", payment.id)))?;
        *stored = payment.clone();
        Ok(())
    }

    fn get_payment(&self, payment_id: &PaymentId) -> Result<Option<PaymentRecord>> {
        Ok(self.inner.read().payments.get(payment_id).cloned())
    }

    fn get_payment_by_reference(&self, reference: &str) -> Result<Option<PaymentRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .payments_by_reference
            .get(reference)
            .and_then(|id| inner.payments.get(id))
            .cloned())
    }

    fn list_payments_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentRecord>> {
        let mut payments: Vec<_> = self
            .inner
            .read()
            .payments
            .values()
            .filter(|payment| payment.user_id == *user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(payments, limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmeter_core::{PaymentStatus, ProviderSelection, CallDirection};
    use rust_decimal::Decimal;

    fn funded(store: &MemoryStore, amount: i64) -> Wallet {
        let wallet = Wallet::new(UserId::generate(), None);
        store.create_wallet(&wallet).unwrap();
        let entry = LedgerEntry::new(&wallet, EntryKind::Bonus, Decimal::from(amount), "seed".into(), None);
        let next = wallet.with_entry(&entry);
        store.commit_entry(&next, &entry, None).unwrap();
        next
    }

    #[test]
    fn one_wallet_per_user() {
        let store = MemoryStore::new();
        let wallet = Wallet::new(UserId::generate(), None);
        store.create_wallet(&wallet).unwrap();

        let again = Wallet::new(wallet.user_id, None);
        assert!(matches!(store.create_wallet(&again), Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn commit_rejects_stale_version() {
        let store = MemoryStore::new();
        let wallet = funded(&store, 10);

        // Built from the version-1 state a second time.
        let stale = Wallet { version: 1, ..wallet.clone() };
        let entry = LedgerEntry::new(&stale, EntryKind::Deduction, Decimal::ONE, "call".into(), None);
        let next = stale.with_entry(&entry);
        assert_eq!(next.version, 2);
        store.commit_entry(&next, &entry, None).unwrap();

        let entry = LedgerEntry::new(&stale, EntryKind::Deduction, Decimal::ONE, "call".into(), None);
        let result = store.commit_entry(&stale.with_entry(&entry), &entry, None);
        assert!(matches!(result, Err(StoreError::Conflict { expected: 1, found: 2, .. })));

        let stored = store.get_wallet(&wallet.id).unwrap().unwrap();
        assert_eq!(stored.balance, Decimal::from(9));
        assert_eq!(store.list_entries(&wallet.id, 10, 0).unwrap().len(), 2);
    }

    #[test]
    fn duplicate_reference_is_rejected_without_writing() {
        let store = MemoryStore::new();
        let wallet = funded(&store, 10);
        let reference = EntryReference::call(CallId::generate());

        let entry = LedgerEntry::new(&wallet, EntryKind::Deduction, Decimal::ONE, "call".into(), Some(reference.clone()));
        let next = wallet.with_entry(&entry);
        store.commit_entry(&next, &entry, None).unwrap();

        let again = LedgerEntry::new(&next, EntryKind::Deduction, Decimal::ONE, "call".into(), Some(reference.clone()));
        let result = store.commit_entry(&next.with_entry(&again), &again, None);
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));

        let found = store
            .find_entry_by_reference(&wallet.id, EntryKind::Deduction, &reference)
            .unwrap()
            .unwrap();
        assert_eq!(found.id, entry.id);
        assert!(store
            .find_entry_by_reference(&wallet.id, EntryKind::Refund, &reference)
            .unwrap()
            .is_none());
        assert_eq!(store.get_wallet(&wallet.id).unwrap().unwrap().balance, Decimal::from(9));
    }

    #[test]
    fn entries_list_newest_first() {
        let store = MemoryStore::new();
        let mut wallet = funded(&store, 10);
        for i in 1..=3 {
            let entry = LedgerEntry::new(&wallet, EntryKind::Deduction, Decimal::ONE, format!("call {i}"), None);
            wallet = wallet.with_entry(&entry);
            store.commit_entry(&wallet, &entry, None).unwrap();
        }

        let page1 = store.list_entries(&wallet.id, 2, 0).unwrap();
        let page2 = store.list_entries(&wallet.id, 2, 2).unwrap();
        assert_eq!(page1[0].description, "call 3");
        assert_eq!(page1[1].description, "call 2");
        assert_eq!(page2[0].description, "call 1");
        assert_eq!(page2[1].description, "seed");
    }

    #[test]
    fn payment_commits_with_entry() {
        let store = MemoryStore::new();
        let wallet = Wallet::new(UserId::generate(), None);
        store.create_wallet(&wallet).unwrap();

        let payment = PaymentRecord::pending(wallet.user_id, wallet.id, Decimal::from(20), "USD".into(), Some("pi_1".into()));
        store.create_payment(&payment).unwrap();
        assert!(matches!(store.create_payment(&payment), Err(StoreError::AlreadyExists(_))));

        let entry = LedgerEntry::new(
            &wallet,
            EntryKind::Topup,
            payment.amount,
            "top-up".into(),
            Some(EntryReference::payment(payment.id)),
        );
        let paid = payment.succeeded(entry.created_at);
        store.commit_entry(&wallet.with_entry(&entry), &entry, Some(&paid)).unwrap();

        let stored = store.get_payment_by_reference("pi_1").unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Succeeded);
        assert_eq!(store.get_wallet(&wallet.id).unwrap().unwrap().balance, Decimal::from(20));
    }

    #[test]
    fn active_calls_exclude_terminal_states() {
        let store = MemoryStore::new();
        let open = CallRecord::open(
            UserId::generate(),
            WalletId::generate(),
            AgentId::generate(),
            "+15550100".into(),
            CallDirection::Inbound,
            ProviderSelection::default(),
            None,
        );
        let mut settled = open.clone();
        settled.id = CallId::generate();
        settled.state = callmeter_core::CallState::Settled;

        store.put_call(&open).unwrap();
        store.complete_settlement(&settled, None).unwrap();

        let active = store.list_active_calls().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, open.id);
        assert_eq!(store.list_calls_by_user(&open.user_id, 10, 0).unwrap().len(), 2);
    }
}
