//! Call usage types for callmeter.
//!
//! Pipeline stages report raw quantities while a call is live. When the call
//! ends the counters are frozen into [`UsageCounters`] and priced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::cost::CallCostBreakdown;
use crate::error::BillingError;
use crate::pricing::{ProviderSelection, ResolvedRates};
use crate::{AgentId, CallId, EntryId, UserId, WalletId};

/// A quantity a pipeline stage can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    /// Prompt tokens sent to the language model.
    LlmInputTokens,
    /// Completion tokens produced by the language model.
    LlmOutputTokens,
    /// Characters synthesized to speech.
    TtsCharacters,
    /// Seconds of audio transcribed.
    SttSeconds,
}

impl UsageKind {
    /// All reportable kinds.
    pub const ALL: [Self; 4] = [
        Self::LlmInputTokens,
        Self::LlmOutputTokens,
        Self::TtsCharacters,
        Self::SttSeconds,
    ];

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LlmInputTokens => "llm_input_tokens",
            Self::LlmOutputTokens => "llm_output_tokens",
            Self::TtsCharacters => "tts_characters",
            Self::SttSeconds => "stt_seconds",
        }
    }

    /// Position in a counter array.
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::LlmInputTokens => 0,
            Self::LlmOutputTokens => 1,
            Self::TtsCharacters => 2,
            Self::SttSeconds => 3,
        }
    }
}

impl fmt::Display for UsageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| BillingError::InvalidCallState(format!("unknown usage kind: {s}")))
    }
}

/// Point-in-time usage totals for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    /// Language-model prompt tokens.
    pub llm_input_tokens: u64,
    /// Language-model completion tokens.
    pub llm_output_tokens: u64,
    /// Synthesized characters.
    pub tts_characters: u64,
    /// Transcribed seconds.
    pub stt_seconds: u64,
}

impl UsageCounters {
    /// Build counters from an array ordered by [`UsageKind::index`].
    #[must_use]
    pub const fn from_array(values: [u64; 4]) -> Self {
        Self {
            llm_input_tokens: values[0],
            llm_output_tokens: values[1],
            tts_characters: values[2],
            stt_seconds: values[3],
        }
    }

    /// Read one counter.
    #[must_use]
    pub const fn get(&self, kind: UsageKind) -> u64 {
        match kind {
            UsageKind::LlmInputTokens => self.llm_input_tokens,
            UsageKind::LlmOutputTokens => self.llm_output_tokens,
            UsageKind::TtsCharacters => self.tts_characters,
            UsageKind::SttSeconds => self.stt_seconds,
        }
    }

    /// Whether nothing has been reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Lifecycle of a call's billing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Usage is being accumulated.
    Open,
    /// Usage is frozen and settlement is in progress.
    Freezing,
    /// The cost was charged (or was zero).
    Settled,
    /// Settlement stopped without charging the wallet.
    Failed,
}

impl CallState {
    /// Whether the record can no longer change state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Failed)
    }

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Freezing => "freezing",
            Self::Settled => "settled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a phone call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    /// Caller dialed the agent.
    #[default]
    Inbound,
    /// Agent dialed out.
    Outbound,
}

/// Why a call failed to settle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SettlementFailure {
    /// The wallet could not cover the total cost.
    InsufficientFunds,
    /// No rate was configured for a service the call used.
    PricingNotConfigured {
        /// Human-readable description of the missing rate.
        detail: String,
    },
}

/// The billing record of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Call identifier.
    pub id: CallId,

    /// User paying for the call.
    pub user_id: UserId,

    /// Wallet charged at settlement.
    pub wallet_id: WalletId,

    /// Agent that handled the call.
    pub agent_id: AgentId,

    /// Remote phone number.
    pub phone_number: String,

    /// Call direction.
    pub direction: CallDirection,

    /// Provider/model selection captured at call start.
    pub providers: ProviderSelection,

    /// Rates the call is priced with: resolved at call start when pricing is
    /// snapshotted, otherwise when the call is frozen.
    pub rate_snapshot: Option<ResolvedRates>,

    /// Lifecycle state.
    pub state: CallState,

    /// Frozen usage; `None` while the call is open.
    pub usage: Option<UsageCounters>,

    /// Billed call duration in seconds, known once the call ends.
    pub duration_seconds: Option<u64>,

    /// Cost breakdown, recorded on settlement and on failed settlement.
    pub cost: Option<CallCostBreakdown>,

    /// Whether the cost was actually debited from the wallet.
    pub debit_applied: bool,

    /// The ledger entry that charged the call.
    pub ledger_entry_id: Option<EntryId>,

    /// Set when the call ends in `Failed`.
    pub failure: Option<SettlementFailure>,

    /// When the call started.
    pub started_at: DateTime<Utc>,

    /// When the call ended.
    pub ended_at: Option<DateTime<Utc>>,

    /// When settlement completed.
    pub settled_at: Option<DateTime<Utc>>,
}

impl CallRecord {
    /// Create an open call record.
    #[must_use]
    pub fn open(
        user_id: UserId,
        wallet_id: WalletId,
        agent_id: AgentId,
        phone_number: String,
        direction: CallDirection,
        providers: ProviderSelection,
        rate_snapshot: Option<ResolvedRates>,
    ) -> Self {
        Self {
            id: CallId::generate(),
            user_id,
            wallet_id,
            agent_id,
            phone_number,
            direction,
            providers,
            rate_snapshot,
            state: CallState::Open,
            usage: None,
            duration_seconds: None,
            cost: None,
            debit_applied: false,
            ledger_entry_id: None,
            failure: None,
            started_at: Utc::now(),
            ended_at: None,
            settled_at: None,
        }
    }

    /// Seconds of transcription billed: the reported STT seconds, or the
    /// call duration when no stage reported any.
    #[must_use]
    pub fn billable_stt_seconds(usage: &UsageCounters, duration_seconds: u64) -> u64 {
        if usage.stt_seconds == 0 {
            duration_seconds
        } else {
            usage.stt_seconds
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_index_by_kind() {
        let counters = UsageCounters::from_array([300, 200, 240, 0]);
        assert_eq!(counters.get(UsageKind::LlmInputTokens), 300);
        assert_eq!(counters.get(UsageKind::LlmOutputTokens), 200);
        assert_eq!(counters.get(UsageKind::TtsCharacters), 240);
        assert_eq!(counters.get(UsageKind::SttSeconds), 0);
        for kind in UsageKind::ALL {
            assert_eq!(UsageKind::ALL[kind.index()], kind);
        }
    }

    #[test]
    fn usage_kind_wire_names_round_trip() {
        for kind in UsageKind::ALL {
            assert_eq!(kind.as_str().parse::<UsageKind>().unwrap(), kind);
        }
        assert!("video_frames".parse::<UsageKind>().is_err());
    }

    #[test]
    fn stt_falls_back_to_duration() {
        let silent = UsageCounters::default();
        assert!(silent.is_empty());
        assert_eq!(CallRecord::billable_stt_seconds(&silent, 120), 120);

        let reported = UsageCounters::from_array([0, 0, 0, 45]);
        assert_eq!(CallRecord::billable_stt_seconds(&reported, 120), 45);
    }

    #[test]
    fn terminal_states() {
        assert!(!CallState::Open.is_terminal());
        assert!(!CallState::Freezing.is_terminal());
        assert!(CallState::Settled.is_terminal());
        assert!(CallState::Failed.is_terminal());
    }

    #[test]
    fn new_call_is_open() {
        let call = CallRecord::open(
            UserId::generate(),
            WalletId::generate(),
            AgentId::generate(),
            "+15550100".into(),
            CallDirection::Outbound,
            ProviderSelection::default(),
            None,
        );
        assert_eq!(call.state, CallState::Open);
        assert!(call.usage.is_none());
        assert!(!call.debit_applied);
    }
}
