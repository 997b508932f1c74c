//! Core types and pricing logic for callmeter.
//!
//! This crate provides the foundational types used throughout callmeter:
//!
//! - **Identifiers**: `UserId`, `WalletId`, `AgentId`, `CallId`, `PaymentId`, `RateId`, `EntryId`
//! - **Wallets**: `Wallet`, `AutoRecharge`
//! - **Ledger**: `LedgerEntry`, `EntryKind`, `EntryReference`
//! - **Pricing**: `RateRecord`, `ServiceKind`, `ProviderSelection`, `ResolvedRates`
//! - **Usage**: `UsageKind`, `UsageCounters`, `CallRecord`, `CallState`
//! - **Cost**: `compute`, `CostComponents`, `CallCostBreakdown`
//! - **Payments**: `PaymentRecord`, `PaymentStatus`, `PaymentOutcome`
//!
//! # Money
//!
//! All amounts are `rust_decimal::Decimal`. Rates carry 6 fractional digits,
//! balances and stored costs 4, top-up amounts 2. Arithmetic runs at full
//! precision and is rounded (midpoint away from zero) only when stored.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agent;
pub mod cost;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod money;
pub mod payment;
pub mod pricing;
pub mod usage;
pub mod wallet;

pub use agent::{AgentProfile, AgentStats};
pub use cost::{
    compute, estimate_usage, CallCostBreakdown, CostComponents, DEFAULT_PLATFORM_FEE_PERCENTAGE,
};
pub use error::{BillingError, Result};
pub use ids::{AgentId, CallId, EntryId, IdError, PaymentId, RateId, UserId, WalletId};
pub use ledger::{replay, EntryKind, EntryReference, LedgerEntry, ReferenceKind};
pub use money::{fits_scale, round_money, MONEY_SCALE, RATE_SCALE, TOPUP_SCALE};
pub use payment::{PaymentOutcome, PaymentRecord, PaymentStatus};
pub use pricing::{
    default_rates, ProviderSelection, RateRecord, ResolvedRates, ServiceKind, UnitType,
};
pub use usage::{
    CallDirection, CallRecord, CallState, SettlementFailure, UsageCounters, UsageKind,
};
pub use wallet::{AutoRecharge, Wallet, DEFAULT_LOW_BALANCE_THRESHOLD};
