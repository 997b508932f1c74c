//! Call lifecycle and call history handlers.
//!
//! The `/v1/service/calls` routes are used by the call orchestrator and the
//! pipeline stages; the `/v1/calls` routes serve the paying user.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use callmeter_core::{
    AgentId, CallCostBreakdown, CallDirection, CallId, CallRecord, CallState, ProviderSelection,
    UsageKind, UserId,
};

use crate::auth::{AuthUser, ServiceAuth};
use crate::error::ApiError;
use crate::settlement::{CallPage, CallStatistics, StartCall};
use crate::state::AppState;

fn parse_call_id(raw: &str) -> Result<CallId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid call id: {raw}")))
}

// ============================================================================
// Service routes
// ============================================================================

/// Start call request.
#[derive(Debug, Deserialize)]
pub struct StartCallRequest {
    /// Paying user.
    pub user_id: UserId,
    /// Agent handling the call.
    pub agent_id: AgentId,
    /// Remote phone number.
    pub phone_number: String,
    /// Call direction (default: inbound).
    #[serde(default)]
    pub direction: CallDirection,
}

/// Open a call.
pub async fn start_call(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<StartCallRequest>,
) -> Result<Json<CallRecord>, ApiError> {
    tracing::debug!(service = %service.service_name, agent_id = %body.agent_id, "Start call requested");

    let call = state.settlement.start_call(StartCall {
        user_id: body.user_id,
        agent_id: body.agent_id,
        phone_number: body.phone_number,
        direction: body.direction,
    })?;
    Ok(Json(call))
}

/// One usage report.
#[derive(Debug, Deserialize)]
pub struct UsageReport {
    /// Counter to increase.
    pub kind: UsageKind,
    /// Amount to add.
    pub quantity: u64,
}

/// Usage report response.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    /// The call.
    pub call_id: CallId,
    /// Counter that was increased.
    pub kind: UsageKind,
    /// Counter total after the report.
    pub total: u64,
}

/// Report usage for an open call.
pub async fn report_usage(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Path(call_id): Path<String>,
    Json(body): Json<UsageReport>,
) -> Result<Json<UsageResponse>, ApiError> {
    let call_id = parse_call_id(&call_id)?;
    let total = state
        .settlement
        .report_usage(&call_id, body.kind, body.quantity)
        .await?;
    Ok(Json(UsageResponse {
        call_id,
        kind: body.kind,
        total,
    }))
}

/// Batch usage request.
#[derive(Debug, Deserialize)]
pub struct UsageBatchRequest {
    /// Reports, applied in order.
    pub reports: Vec<UsageReport>,
}

/// Batch usage response.
#[derive(Debug, Serialize)]
pub struct UsageBatchResponse {
    /// Totals after each report.
    pub results: Vec<UsageResponse>,
}

/// Report several usage increments for one call.
///
/// Reports before a failing one stay applied.
pub async fn report_usage_batch(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Path(call_id): Path<String>,
    Json(body): Json<UsageBatchRequest>,
) -> Result<Json<UsageBatchResponse>, ApiError> {
    let call_id = parse_call_id(&call_id)?;
    if body.reports.len() > 100 {
        return Err(ApiError::BadRequest(
            "Batch size exceeds maximum of 100 reports".into(),
        ));
    }

    let mut results = Vec::with_capacity(body.reports.len());
    for report in body.reports {
        let total = state
            .settlement
            .report_usage(&call_id, report.kind, report.quantity)
            .await?;
        results.push(UsageResponse {
            call_id,
            kind: report.kind,
            total,
        });
    }

    Ok(Json(UsageBatchResponse { results }))
}

/// End call request.
#[derive(Debug, Deserialize)]
pub struct EndCallRequest {
    /// Call duration in seconds.
    pub duration_seconds: u64,
}

/// End a call and settle it.
///
/// A call that could not be paid for is returned with state `failed`.
pub async fn end_call(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Path(call_id): Path<String>,
    Json(body): Json<EndCallRequest>,
) -> Result<Json<CallRecord>, ApiError> {
    let call_id = parse_call_id(&call_id)?;
    let call = state
        .settlement
        .end_call(&call_id, body.duration_seconds)
        .await?;
    Ok(Json(call))
}

/// Get any call (service view).
pub async fn get_service_call(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Path(call_id): Path<String>,
) -> Result<Json<CallRecord>, ApiError> {
    let call_id = parse_call_id(&call_id)?;
    Ok(Json(state.settlement.get_call(&call_id)?))
}

// ============================================================================
// User routes
// ============================================================================

/// Call list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListCallsQuery {
    /// Maximum number of calls to return (default: 50).
    #[serde(default = "super::default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
    /// Only calls in this state.
    #[serde(default)]
    pub state: Option<CallState>,
}

/// List the caller's calls.
pub async fn list_calls(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListCallsQuery>,
) -> Result<Json<CallPage>, ApiError> {
    let page = state
        .settlement
        .list_calls(&auth.user_id, query.limit, query.offset, query.state)?;
    Ok(Json(page))
}

/// Get one of the caller's calls.
pub async fn get_call(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(call_id): Path<String>,
) -> Result<Json<CallRecord>, ApiError> {
    let call_id = parse_call_id(&call_id)?;
    Ok(Json(state.settlement.get_user_call(&auth.user_id, &call_id)?))
}

/// Aggregate figures over the caller's calls.
pub async fn call_statistics(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CallStatistics>, ApiError> {
    Ok(Json(state.settlement.user_call_statistics(&auth.user_id)?))
}

/// Estimate request.
#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    /// Expected call length.
    pub duration_seconds: u64,
    /// Providers to price (default selection when absent).
    #[serde(default)]
    pub providers: Option<ProviderSelection>,
}

/// Estimate response.
#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    /// Expected call length.
    pub duration_seconds: u64,
    /// Estimated cost at current rates with typical usage.
    pub estimate: CallCostBreakdown,
}

/// Estimate the cost of a call.
pub async fn estimate_call(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(body): Json<EstimateRequest>,
) -> Result<Json<EstimateResponse>, ApiError> {
    let providers = body.providers.unwrap_or_default();
    let estimate = state
        .settlement
        .estimate(body.duration_seconds, &providers)?;
    Ok(Json(EstimateResponse {
        duration_seconds: body.duration_seconds,
        estimate,
    }))
}
