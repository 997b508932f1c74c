//! Call lifecycle and settlement.
//!
//! A call moves `open -> freezing -> settled | failed`. Ending a call freezes
//! its meter, persists the frozen usage and the rates it will be priced at in
//! `freezing`, prices it, and debits the wallet with the call id as ledger
//! reference. Because the debit is reference-idempotent, a settlement
//! interrupted after the debit resumes by finding the existing entry and
//! finishing the record. Agent statistics and refunds use the debited amount.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use callmeter_core::{
    compute, estimate_usage, AgentId, AgentProfile, AgentStats, BillingError, CallCostBreakdown,
    CallDirection, CallId, CallRecord, CallState, EntryKind, EntryReference, LedgerEntry,
    ProviderSelection, ResolvedRates, Result, SettlementFailure, UsageKind, UserId,
    DEFAULT_PLATFORM_FEE_PERCENTAGE,
};
use callmeter_store::Store;

use crate::accumulator::UsageAccumulator;
use crate::ledger::{Ledger, Posting, MAX_PAGE_SIZE};
use crate::locks::KeyedLocks;
use crate::rates::RateTable;

/// When a call's rates are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMode {
    /// Resolve at `start_call` and price with that snapshot.
    #[default]
    CallStart,
    /// Resolve when the call settles.
    Settlement,
}

impl FromStr for PricingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "call_start" => Ok(Self::CallStart),
            "settlement" => Ok(Self::Settlement),
            other => Err(format!("unknown pricing mode: {other}")),
        }
    }
}

impl fmt::Display for PricingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CallStart => "call_start",
            Self::Settlement => "settlement",
        })
    }
}

/// Settlement settings.
#[derive(Debug, Clone, Copy)]
pub struct SettlementConfig {
    /// When rates are resolved.
    pub pricing_mode: PricingMode,
    /// Platform fee on top of the base cost, in percent.
    pub platform_fee_percentage: Decimal,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            pricing_mode: PricingMode::default(),
            platform_fee_percentage: DEFAULT_PLATFORM_FEE_PERCENTAGE,
        }
    }
}

/// Parameters of a new call.
#[derive(Debug, Clone)]
pub struct StartCall {
    /// Paying user.
    pub user_id: UserId,
    /// Agent handling the call; must belong to the user.
    pub agent_id: AgentId,
    /// Remote phone number.
    pub phone_number: String,
    /// Call direction.
    pub direction: CallDirection,
}

/// Aggregate call figures for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallStatistics {
    /// Every call the user started.
    pub total_calls: u64,
    /// Calls that settled.
    pub successful_calls: u64,
    /// Calls that failed to settle.
    pub failed_calls: u64,
    /// Calls still open or settling.
    pub active_calls: u64,
    /// Billed seconds over settled calls.
    pub total_duration_seconds: u64,
    /// Amount charged over settled calls.
    pub total_spent: Decimal,
}

/// One page of call records.
#[derive(Debug, Clone, Serialize)]
pub struct CallPage {
    /// Calls, newest first.
    pub calls: Vec<CallRecord>,
    /// Whether more calls follow.
    pub has_more: bool,
    /// Page size used.
    pub limit: usize,
    /// Calls skipped.
    pub offset: usize,
}

/// Orchestrates metering, pricing and charging of calls.
pub struct SettlementEngine {
    store: Arc<dyn Store>,
    rates: Arc<RateTable>,
    meters: Arc<UsageAccumulator>,
    ledger: Arc<Ledger>,
    call_locks: KeyedLocks<CallId>,
    agent_locks: KeyedLocks<AgentId>,
    config: SettlementConfig,
}

impl SettlementEngine {
    /// Wire the engine to its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        rates: Arc<RateTable>,
        meters: Arc<UsageAccumulator>,
        ledger: Arc<Ledger>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            store,
            rates,
            meters,
            ledger,
            call_locks: KeyedLocks::new(),
            agent_locks: KeyedLocks::new(),
            config,
        }
    }

    /// Settlement settings in use.
    #[must_use]
    pub fn config(&self) -> SettlementConfig {
        self.config
    }

    // =========================================================================
    // Agents
    // =========================================================================

    /// Register an agent or replace its provider selection.
    ///
    /// Statistics of an existing profile are kept.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the agent is registered to another user.
    pub async fn register_agent(
        &self,
        agent_id: AgentId,
        user_id: UserId,
        providers: ProviderSelection,
    ) -> Result<AgentProfile> {
        let _guard = self.agent_locks.lock(&agent_id).await;

        let profile = match self.store.get_agent(&agent_id)? {
            Some(existing) if existing.user_id != user_id => {
                return Err(BillingError::AlreadyExists(format!(
                    "agent {agent_id} belongs to another user"
                )));
            }
            Some(existing) => AgentProfile {
                providers,
                updated_at: Utc::now(),
                ..existing
            },
            None => AgentProfile::new(agent_id, user_id, providers),
        };

        self.store.put_agent(&profile)?;
        tracing::info!(agent_id = %agent_id, user_id = %user_id, "Agent registered");
        Ok(profile)
    }

    fn owned_agent(&self, user_id: &UserId, agent_id: &AgentId) -> Result<AgentProfile> {
        self.store
            .get_agent(agent_id)?
            .filter(|agent| agent.user_id == *user_id)
            .ok_or_else(|| BillingError::AgentNotFound(agent_id.to_string()))
    }

    /// Aggregate statistics of one of the user's agents.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` if the agent doesn't exist or belongs to
    /// another user.
    pub fn agent_stats(&self, user_id: &UserId, agent_id: &AgentId) -> Result<AgentStats> {
        self.owned_agent(user_id, agent_id).map(|agent| agent.stats)
    }

    // =========================================================================
    // Call lifecycle
    // =========================================================================

    /// Open a call and start metering it.
    ///
    /// # Errors
    ///
    /// - `AgentNotFound` if the agent is not the user's.
    /// - `WalletNotFound` if the user has no wallet.
    /// - `PricingNotConfigured` when rates are snapshotted at call start and
    ///   one of the agent's services has no rate.
    pub fn start_call(&self, request: StartCall) -> Result<CallRecord> {
        let agent = self.owned_agent(&request.user_id, &request.agent_id)?;
        let wallet = self.ledger.wallet_for_user(&request.user_id)?;

        let snapshot = match self.config.pricing_mode {
            PricingMode::CallStart => {
                Some(self.rates.resolve_selection(&agent.providers, Utc::now())?)
            }
            PricingMode::Settlement => None,
        };

        let call = CallRecord::open(
            request.user_id,
            wallet.id,
            request.agent_id,
            request.phone_number,
            request.direction,
            agent.providers,
            snapshot,
        );
        self.store.put_call(&call)?;
        self.meters.open(call.id, call.started_at);

        tracing::info!(
            call_id = %call.id,
            user_id = %call.user_id,
            agent_id = %call.agent_id,
            direction = ?call.direction,
            pricing_mode = %self.config.pricing_mode,
            "Call started"
        );
        Ok(call)
    }

    /// Add usage to an open call and return the counter's new total.
    ///
    /// # Errors
    ///
    /// - `CallNotFound` if the call doesn't exist.
    /// - `CallAlreadyClosed` if the call has been frozen.
    pub async fn report_usage(
        &self,
        call_id: &CallId,
        kind: UsageKind,
        quantity: u64,
    ) -> Result<u64> {
        match self.meters.report(call_id, kind, quantity) {
            Err(BillingError::CallNotFound(_)) => {}
            other => {
                if let Ok(total) = &other {
                    tracing::debug!(call_id = %call_id, kind = %kind, quantity, total, "Usage reported");
                }
                return other;
            }
        }

        // No meter: the process restarted while the call was open, or the
        // call already settled. Reopening races `end_call`, so it happens
        // under the call lock and against a fresh read of the record.
        let _guard = self.call_locks.lock(call_id).await;
        match self.meters.report(call_id, kind, quantity) {
            Err(BillingError::CallNotFound(_)) => {}
            other => return other,
        }

        let call = self.load_call(call_id)?;
        if call.state != CallState::Open {
            return Err(BillingError::CallAlreadyClosed {
                call_id: call_id.to_string(),
            });
        }

        tracing::warn!(call_id = %call_id, "Reopening meter for open call");
        self.meters.open(*call_id, Utc::now());
        self.meters.report(call_id, kind, quantity)
    }

    /// End a call and settle it.
    ///
    /// Ending an already settled or failed call returns its record unchanged.
    /// A call left in `freezing` by an interrupted settlement resumes with the
    /// usage and duration recorded the first time.
    ///
    /// The returned record is `settled`, or `failed` with
    /// `SettlementFailure::InsufficientFunds` when the wallet could not cover
    /// the cost.
    ///
    /// # Errors
    ///
    /// - `CallNotFound` if the call doesn't exist.
    /// - `PricingNotConfigured` if a rate is missing; the call is marked failed.
    /// - `LockContention` if the wallet stayed busy; the call stays in
    ///   `freezing` for a later retry.
    pub async fn end_call(&self, call_id: &CallId, duration_seconds: u64) -> Result<CallRecord> {
        let _guard = self.call_locks.lock(call_id).await;

        let mut call = self.load_call(call_id)?;
        if call.state.is_terminal() {
            tracing::debug!(call_id = %call_id, state = %call.state, "Call already settled");
            return Ok(call);
        }

        if call.state == CallState::Open {
            self.freeze_call(&mut call, duration_seconds)?;
        }

        let result = self.settle(call).await;
        self.call_locks.prune();
        result
    }

    /// Freeze an open call's usage and persist it in `freezing` together
    /// with the rates it will be priced at.
    fn freeze_call(&self, call: &mut CallRecord, duration_seconds: u64) -> Result<()> {
        let usage = match self.meters.freeze(&call.id) {
            Ok(usage) => usage,
            Err(BillingError::CallNotFound(_)) => {
                tracing::warn!(call_id = %call.id, "No meter for open call, settling empty usage");
                callmeter_core::UsageCounters::default()
            }
            Err(e) => return Err(e),
        };

        // A resumed settlement must price exactly what the first attempt charged.
        if call.rate_snapshot.is_none() {
            match self.rates.resolve_selection(&call.providers, Utc::now()) {
                Ok(rates) => call.rate_snapshot = Some(rates),
                Err(BillingError::PricingNotConfigured { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        call.state = CallState::Freezing;
        call.usage = Some(usage);
        call.duration_seconds = Some(duration_seconds);
        call.ended_at = Some(Utc::now());
        self.store.put_call(call)?;
        Ok(())
    }

    async fn settle(&self, mut call: CallRecord) -> Result<CallRecord> {
        let usage = call.usage.unwrap_or_default();
        let duration = call.duration_seconds.unwrap_or_default();

        let rates = match self.rates_for(&call) {
            Ok(rates) => rates,
            Err(e @ BillingError::PricingNotConfigured { .. }) => {
                tracing::error!(call_id = %call.id, error = %e, "Cannot price call");
                call.state = CallState::Failed;
                call.failure = Some(SettlementFailure::PricingNotConfigured {
                    detail: e.to_string(),
                });
                call.settled_at = Some(Utc::now());
                self.store.complete_settlement(&call, None)?;
                self.meters.remove(&call.id);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let breakdown = compute(&usage, duration, &rates, self.config.platform_fee_percentage)
            .rounded();
        call.cost = Some(breakdown);

        let mut charged = breakdown.total_cost;
        if breakdown.total_cost.is_zero() {
            call.state = CallState::Settled;
        } else {
            match self.charge(&call, &breakdown).await {
                Ok(entry) => {
                    call.state = CallState::Settled;
                    call.debit_applied = true;
                    call.ledger_entry_id = Some(entry.id);
                    charged = entry.amount;
                }
                Err(BillingError::InsufficientFunds { .. }) => {
                    call.state = CallState::Failed;
                    call.failure = Some(SettlementFailure::InsufficientFunds);
                }
                Err(e) => {
                    tracing::warn!(call_id = %call.id, error = %e, "Settlement deferred");
                    return Err(e);
                }
            }
        }
        call.settled_at = Some(Utc::now());

        self.finish(&call, duration, charged).await?;
        self.meters.remove(&call.id);

        tracing::info!(
            call_id = %call.id,
            state = %call.state,
            duration_seconds = duration,
            total_cost = %charged,
            debit_applied = call.debit_applied,
            "Call settled"
        );
        Ok(call)
    }

    fn rates_for(&self, call: &CallRecord) -> Result<ResolvedRates> {
        match &call.rate_snapshot {
            Some(snapshot) => Ok(snapshot.clone()),
            None => self.rates.resolve_selection(&call.providers, Utc::now()),
        }
    }

    async fn charge(
        &self,
        call: &CallRecord,
        breakdown: &CallCostBreakdown,
    ) -> Result<LedgerEntry> {
        let duration = call.duration_seconds.unwrap_or_default();
        let posting = Posting::new(
            EntryKind::Deduction,
            breakdown.total_cost,
            format!("Call cost - {duration}s"),
            Some(EntryReference::call(call.id)),
        );
        let posted = self.ledger.debit_once(&call.wallet_id, &posting).await?;
        if !posted.applied {
            tracing::info!(call_id = %call.id, entry_id = %posted.entry.id, "Resumed settlement");
            if posted.entry.amount != breakdown.total_cost {
                // The debit is the source of truth for stats and refunds.
                tracing::error!(
                    call_id = %call.id,
                    entry_id = %posted.entry.id,
                    debited = %posted.entry.amount,
                    priced = %breakdown.total_cost,
                    "Resumed settlement priced differently from the original debit"
                );
            }
        }
        Ok(posted.entry)
    }

    /// Persist the final record; charged calls also bump agent statistics.
    async fn finish(&self, call: &CallRecord, duration: u64, total: Decimal) -> Result<()> {
        if call.state != CallState::Settled {
            self.store.complete_settlement(call, None)?;
            return Ok(());
        }

        let _guard = self.agent_locks.lock(&call.agent_id).await;
        let agent = self
            .store
            .get_agent(&call.agent_id)?
            .map(|agent| agent.with_settled_call(duration, total));
        self.store.complete_settlement(call, agent.as_ref())?;
        Ok(())
    }

    /// Credit a settled call's charge back to the wallet.
    ///
    /// Refunding twice returns the first refund entry.
    ///
    /// # Errors
    ///
    /// - `CallNotFound` if the call doesn't exist.
    /// - `InvalidCallState` if the call was never charged.
    pub async fn refund_call(&self, call_id: &CallId, reason: &str) -> Result<LedgerEntry> {
        let call = self.load_call(call_id)?;
        let entry_id = match (&call.state, call.debit_applied, call.ledger_entry_id) {
            (CallState::Settled, true, Some(entry_id)) => entry_id,
            _ => {
                return Err(BillingError::InvalidCallState(format!(
                    "call {call_id} was not charged"
                )))
            }
        };
        let cost = self
            .store
            .get_entry(&entry_id)?
            .ok_or_else(|| BillingError::TransactionNotFound(entry_id.to_string()))?
            .amount;

        let posting = Posting::new(
            EntryKind::Refund,
            cost,
            format!("Refund for call {call_id}: {reason}"),
            Some(EntryReference::call(*call_id)),
        );
        let posted = self.ledger.credit_once(&call.wallet_id, &posting).await?;
        tracing::info!(
            call_id = %call_id,
            amount = %cost,
            applied = posted.applied,
            "Call refunded"
        );
        Ok(posted.entry)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn load_call(&self, call_id: &CallId) -> Result<CallRecord> {
        self.store
            .get_call(call_id)?
            .ok_or_else(|| BillingError::CallNotFound(call_id.to_string()))
    }

    /// Get a call record.
    ///
    /// # Errors
    ///
    /// Returns `CallNotFound` if it doesn't exist.
    pub fn get_call(&self, call_id: &CallId) -> Result<CallRecord> {
        self.load_call(call_id)
    }

    /// Get one of a user's calls.
    ///
    /// # Errors
    ///
    /// Returns `CallNotFound` if it doesn't exist or belongs to another user.
    pub fn get_user_call(&self, user_id: &UserId, call_id: &CallId) -> Result<CallRecord> {
        Some(self.load_call(call_id)?)
            .filter(|call| call.user_id == *user_id)
            .ok_or_else(|| BillingError::CallNotFound(call_id.to_string()))
    }

    /// List a user's calls, newest first, optionally in one state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list_calls(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
        state: Option<CallState>,
    ) -> Result<CallPage> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let mut calls = match state {
            None => self.store.list_calls_by_user(user_id, limit + 1, offset)?,
            Some(state) => self
                .store
                .list_calls_by_user(user_id, usize::MAX, 0)?
                .into_iter()
                .filter(|call| call.state == state)
                .skip(offset)
                .take(limit + 1)
                .collect(),
        };
        let has_more = calls.len() > limit;
        calls.truncate(limit);

        Ok(CallPage {
            calls,
            has_more,
            limit,
            offset,
        })
    }

    /// Totals over every call of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn user_call_statistics(&self, user_id: &UserId) -> Result<CallStatistics> {
        let calls = self.store.list_calls_by_user(user_id, usize::MAX, 0)?;
        Ok(calls
            .iter()
            .fold(CallStatistics::default(), |mut stats, call| {
                stats.total_calls += 1;
                match call.state {
                    CallState::Settled => {
                        stats.successful_calls += 1;
                        stats.total_duration_seconds += call.duration_seconds.unwrap_or_default();
                        if call.debit_applied {
                            stats.total_spent += call.cost.map_or(Decimal::ZERO, |c| c.total_cost);
                        }
                    }
                    CallState::Failed => stats.failed_calls += 1,
                    CallState::Open | CallState::Freezing => stats.active_calls += 1,
                }
                stats
            }))
    }

    /// Estimated cost of a call of `duration_seconds` with typical usage.
    ///
    /// # Errors
    ///
    /// Returns `PricingNotConfigured` if a current rate is missing.
    pub fn estimate(
        &self,
        duration_seconds: u64,
        providers: &ProviderSelection,
    ) -> Result<CallCostBreakdown> {
        let rates = self.rates.resolve_selection(providers, Utc::now())?;
        let usage = estimate_usage(duration_seconds);
        Ok(compute(&usage, duration_seconds, &rates, self.config.platform_fee_percentage).rounded())
    }

    /// Calls not yet settled or failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn active_calls(&self) -> Result<Vec<CallRecord>> {
        Ok(self.store.list_active_calls()?)
    }

    /// When a call was opened or last reported usage, if it has a meter.
    #[must_use]
    pub fn last_activity(&self, call_id: &CallId) -> Option<chrono::DateTime<Utc>> {
        self.meters.last_activity(call_id)
    }
}
