//! Request and response types of the metering API.

use serde::{Deserialize, Serialize};

use callmeter_core::{AgentId, CallDirection, CallId, ProviderSelection, UsageKind, UserId};

pub use callmeter_core::{AgentProfile, CallCostBreakdown, CallRecord, CallState};

/// Request to open a call.
#[derive(Debug, Clone, Serialize)]
pub struct StartCallRequest {
    /// Paying user.
    pub user_id: UserId,
    /// Agent handling the call.
    pub agent_id: AgentId,
    /// Remote phone number.
    pub phone_number: String,
    /// Call direction.
    pub direction: CallDirection,
}

/// Request to register an agent.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterAgentRequest {
    /// Agent identifier.
    pub agent_id: AgentId,
    /// Owning user.
    pub user_id: UserId,
    /// Providers the agent's calls are priced with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<ProviderSelection>,
}

/// One usage increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Counter to increase.
    pub kind: UsageKind,
    /// Amount to add.
    pub quantity: u64,
}

impl UsageReport {
    /// Create a usage report.
    #[must_use]
    pub const fn new(kind: UsageKind, quantity: u64) -> Self {
        Self { kind, quantity }
    }
}

/// Counter total after a usage report.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageResponse {
    /// The call.
    pub call_id: CallId,
    /// Counter that was increased.
    pub kind: UsageKind,
    /// Counter total.
    pub total: u64,
}

/// Batch usage request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct UsageBatchRequest<'a> {
    pub reports: &'a [UsageReport],
}

/// Batch usage response.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageBatchResponse {
    /// Totals after each report, in order.
    pub results: Vec<UsageResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EndCallRequest {
    pub duration_seconds: u64,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorDetail,
}

/// API error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
