//! Agent billing profiles and aggregate statistics.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pricing::ProviderSelection;
use crate::{AgentId, UserId};

/// The billing view of an agent: who owns it, which providers it uses, and
/// what its settled calls have cost so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Agent identifier.
    pub agent_id: AgentId,

    /// Owning user.
    pub user_id: UserId,

    /// Providers captured into each call started with this agent.
    pub providers: ProviderSelection,

    /// Totals over settled calls.
    pub stats: AgentStats,

    /// When the profile was registered.
    pub created_at: DateTime<Utc>,

    /// When the profile or its stats last changed.
    pub updated_at: DateTime<Utc>,
}

impl AgentProfile {
    /// Register a profile with empty statistics.
    #[must_use]
    pub fn new(agent_id: AgentId, user_id: UserId, providers: ProviderSelection) -> Self {
        let now = Utc::now();
        Self {
            agent_id,
            user_id,
            providers,
            stats: AgentStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The profile after one more call was settled.
    #[must_use]
    pub fn with_settled_call(&self, duration_seconds: u64, cost: Decimal) -> Self {
        let mut next = self.clone();
        next.stats.total_calls += 1;
        next.stats.total_duration_seconds += duration_seconds;
        next.stats.total_cost += cost;
        next.updated_at = Utc::now();
        next
    }
}

/// Aggregate usage of an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    /// Number of settled calls.
    pub total_calls: u64,
    /// Total billed duration.
    pub total_duration_seconds: u64,
    /// Total charged.
    pub total_cost: Decimal,
}
