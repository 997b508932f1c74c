//! Key encoding utilities for `RocksDB`.
//!
//! Composite keys put the owning id first so a prefix scan lists everything
//! for one wallet or user. Time components are big-endian so byte order is
//! chronological order.

use chrono::{DateTime, Utc};

use callmeter_core::{
    AgentId, CallId, EntryId, EntryKind, EntryReference, PaymentId, RateId, UserId, WalletId,
};

use crate::error::{Result, StoreError};

/// Create a wallet key from a wallet ID.
#[must_use]
pub fn wallet_key(wallet_id: &WalletId) -> Vec<u8> {
    wallet_id.as_bytes().to_vec()
}

/// Create a wallet-by-user index key.
#[must_use]
pub fn user_wallet_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create an entry key from an entry ID.
#[must_use]
pub fn entry_key(entry_id: &EntryId) -> Vec<u8> {
    entry_id.to_bytes().to_vec()
}

/// Create a wallet-entry index key.
///
/// Format: `wallet_id (16 bytes) || entry_id (16 bytes)`
///
/// Since ULIDs are time-ordered, entries for a wallet will be sorted by time.
#[must_use]
pub fn wallet_entry_key(wallet_id: &WalletId, entry_id: &EntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(wallet_id.as_bytes());
    key.extend_from_slice(&entry_id.to_bytes());
    key
}

/// Create a prefix for iterating all keys owned by a 16-byte id.
#[must_use]
pub fn id_prefix(id: &[u8; 16]) -> Vec<u8> {
    id.to_vec()
}

/// Create a reference index key.
///
/// Format: `wallet_id (16 bytes) || entry kind || ':' || reference`
#[must_use]
pub fn reference_key(wallet_id: &WalletId, kind: EntryKind, reference: &EntryReference) -> Vec<u8> {
    let reference = reference.to_string();
    let mut key = Vec::with_capacity(16 + kind.as_str().len() + 1 + reference.len());
    key.extend_from_slice(wallet_id.as_bytes());
    key.extend_from_slice(kind.as_str().as_bytes());
    key.push(b':');
    key.extend_from_slice(reference.as_bytes());
    key
}

/// Create a rate key from a rate ID.
#[must_use]
pub fn rate_key(rate_id: &RateId) -> Vec<u8> {
    rate_id.as_bytes().to_vec()
}

/// Create a call key from a call ID.
#[must_use]
pub fn call_key(call_id: &CallId) -> Vec<u8> {
    call_id.as_bytes().to_vec()
}

/// Create a user-call index key.
///
/// Format: `user_id (16 bytes) || started_at millis (8 bytes, BE) || call_id (16 bytes)`
#[must_use]
pub fn user_call_key(user_id: &UserId, started_at: DateTime<Utc>, call_id: &CallId) -> Vec<u8> {
    timed_key(user_id.as_bytes(), started_at, call_id.as_bytes())
}

/// Create an agent key from an agent ID.
#[must_use]
pub fn agent_key(agent_id: &AgentId) -> Vec<u8> {
    agent_id.as_bytes().to_vec()
}

/// Create a payment key from a payment ID.
#[must_use]
pub fn payment_key(payment_id: &PaymentId) -> Vec<u8> {
    payment_id.as_bytes().to_vec()
}

/// Create a payment-by-reference index key.
#[must_use]
pub fn payment_reference_key(reference: &str) -> Vec<u8> {
    reference.as_bytes().to_vec()
}

/// Create a user-payment index key.
///
/// Format: `user_id (16 bytes) || created_at millis (8 bytes, BE) || payment_id (16 bytes)`
#[must_use]
pub fn user_payment_key(
    user_id: &UserId,
    created_at: DateTime<Utc>,
    payment_id: &PaymentId,
) -> Vec<u8> {
    timed_key(user_id.as_bytes(), created_at, payment_id.as_bytes())
}

fn timed_key(owner: &[u8; 16], at: DateTime<Utc>, id: &[u8; 16]) -> Vec<u8> {
    // Pre-epoch timestamps clamp to zero; order among them is by id only.
    let millis = u64::try_from(at.timestamp_millis()).unwrap_or(0);
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(owner);
    key.extend_from_slice(&millis.to_be_bytes());
    key.extend_from_slice(id);
    key
}

/// Extract the entry ID from a wallet-entry index key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is shorter than 32 bytes.
pub fn extract_entry_id(key: &[u8]) -> Result<EntryId> {
    trailing_id(key, 32).map(EntryId::from_bytes)
}

/// Extract the call ID from a user-call index key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is shorter than 40 bytes.
pub fn extract_call_id(key: &[u8]) -> Result<CallId> {
    trailing_id(key, 40).map(CallId::from_bytes)
}

/// Extract the payment ID from a user-payment index key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is shorter than 40 bytes.
pub fn extract_payment_id(key: &[u8]) -> Result<PaymentId> {
    trailing_id(key, 40).map(PaymentId::from_bytes)
}

/// Decode a 16-byte id stored as an index value or key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if `bytes` is not 16 bytes long.
pub fn id_bytes(bytes: &[u8]) -> Result<[u8; 16]> {
    <[u8; 16]>::try_from(bytes)
        .map_err(|_| StoreError::Serialization(format!("expected 16-byte id, got {}", bytes.len())))
}

fn trailing_id(key: &[u8], len: usize) -> Result<[u8; 16]> {
    if key.len() < len {
        return Err(StoreError::Serialization(format!(
            "index key too short: {} < {len}",
            key.len()
        )));
    }
    id_bytes(&key[len - 16..len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wallet_entry_key_format() {
        let wallet_id = WalletId::generate();
        let entry_id = EntryId::generate();
        let key = wallet_entry_key(&wallet_id, &entry_id);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], wallet_id.as_bytes());
        assert_eq!(extract_entry_id(&key).unwrap(), entry_id);
    }

    #[test]
    fn user_call_keys_sort_by_start_time() {
        let user_id = UserId::generate();
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let a = user_call_key(&user_id, early, &CallId::generate());
        let b = user_call_key(&user_id, late, &CallId::generate());

        assert!(a < b);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn extract_call_id_roundtrip() {
        let user_id = UserId::generate();
        let call_id = CallId::generate();
        let key = user_call_key(&user_id, Utc::now(), &call_id);
        assert_eq!(extract_call_id(&key).unwrap(), call_id);
    }

    #[test]
    fn short_keys_are_rejected() {
        assert!(extract_entry_id(&[0u8; 8]).is_err());
        assert!(id_bytes(&[0u8; 15]).is_err());
    }

    #[test]
    fn reference_keys_separate_kinds() {
        let wallet_id = WalletId::generate();
        let reference = EntryReference::call(CallId::generate());
        let debit = reference_key(&wallet_id, EntryKind::Deduction, &reference);
        let refund = reference_key(&wallet_id, EntryKind::Refund, &reference);
        assert_ne!(debit, refund);
        assert!(debit.starts_with(wallet_id.as_bytes()));
    }
}
