//! callmeter HTTP API service.
//!
//! This crate meters voice-pipeline calls and settles them against prepaid
//! wallets:
//!
//! - Effective-dated rate table
//! - Lock-free per-call usage accumulation
//! - Wallet ledger with per-wallet serialization and idempotent postings
//! - Call settlement, refunds and stale call sweeping
//! - Top-up intake with signed payment webhooks
//!
//! # Authentication
//!
//! 1. **JWT bearer tokens** (HS256) - For the paying user (dashboard, etc.)
//! 2. **Service API key** - For the call orchestrator and pipeline stages
//! 3. **Admin API key** - For rate and credit administration

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for the router

pub mod accumulator;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod locks;
pub mod notify;
pub mod rates;
pub mod routes;
pub mod settlement;
pub mod state;
pub mod sweeper;
pub mod topup;

pub use accumulator::UsageAccumulator;
pub use config::{ServiceConfig, StorageBackend};
pub use error::ApiError;
pub use ledger::{Ledger, LedgerConfig, Posting};
pub use notify::{LogNotifier, LowBalanceAlert, LowBalanceNotifier, WebhookNotifier};
pub use rates::{RateInput, RateTable};
pub use routes::create_router;
pub use settlement::{PricingMode, SettlementConfig, SettlementEngine, StartCall};
pub use state::AppState;
pub use sweeper::{StaleCallSweeper, SweepReport};
pub use topup::{TopupIntake, TopupLimits};
