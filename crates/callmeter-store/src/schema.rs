//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Wallet records, keyed by `wallet_id`.
    pub const WALLETS: &str = "wallets";

    /// Index: wallet by owner, keyed by `user_id`, value `wallet_id`.
    pub const WALLETS_BY_USER: &str = "wallets_by_user";

    /// Ledger entries, keyed by `entry_id` (ULID).
    pub const ENTRIES: &str = "entries";

    /// Index: entries by wallet, keyed by `wallet_id || entry_id`.
    /// Value is empty (index only).
    pub const ENTRIES_BY_WALLET: &str = "entries_by_wallet";

    /// Index: entry by cause, keyed by `wallet_id || kind || reference`, value `entry_id`.
    pub const ENTRIES_BY_REFERENCE: &str = "entries_by_reference";

    /// Rate records, keyed by `rate_id`.
    pub const RATES: &str = "rates";

    /// Call records, keyed by `call_id`.
    pub const CALLS: &str = "calls";

    /// Index: calls by user, keyed by `user_id || started_at millis || call_id`.
    pub const CALLS_BY_USER: &str = "calls_by_user";

    /// Index: calls not yet settled, keyed by `call_id`.
    pub const ACTIVE_CALLS: &str = "active_calls";

    /// Agent billing profiles, keyed by `agent_id`.
    pub const AGENTS: &str = "agents";

    /// Payment records, keyed by `payment_id`.
    pub const PAYMENTS: &str = "payments";

    /// Index: payment by external reference, value `payment_id`.
    pub const PAYMENTS_BY_REFERENCE: &str = "payments_by_reference";

    /// Index: payments by user, keyed by `user_id || created_at millis || payment_id`.
    pub const PAYMENTS_BY_USER: &str = "payments_by_user";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::WALLETS,
        cf::WALLETS_BY_USER,
        cf::ENTRIES,
        cf::ENTRIES_BY_WALLET,
        cf::ENTRIES_BY_REFERENCE,
        cf::RATES,
        cf::CALLS,
        cf::CALLS_BY_USER,
        cf::ACTIVE_CALLS,
        cf::AGENTS,
        cf::PAYMENTS,
        cf::PAYMENTS_BY_REFERENCE,
        cf::PAYMENTS_BY_USER,
    ]
}
