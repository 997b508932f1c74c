//! Agent billing profile handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use callmeter_core::{AgentId, AgentProfile, AgentStats, ProviderSelection, UserId};

use crate::auth::{AuthUser, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

/// Register agent request.
#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    /// Agent identifier assigned by the orchestrator.
    pub agent_id: AgentId,
    /// Owning user.
    pub user_id: UserId,
    /// Providers the agent's calls are priced with (default selection when absent).
    #[serde(default)]
    pub providers: Option<ProviderSelection>,
}

/// Register an agent or update its provider selection.
pub async fn register_agent(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<RegisterAgentRequest>,
) -> Result<Json<AgentProfile>, ApiError> {
    tracing::debug!(service = %service.service_name, agent_id = %body.agent_id, "Registering agent");

    let profile = state
        .settlement
        .register_agent(
            body.agent_id,
            body.user_id,
            body.providers.unwrap_or_default(),
        )
        .await?;
    Ok(Json(profile))
}

/// Statistics of one of the caller's agents.
pub async fn agent_stats(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentStats>, ApiError> {
    let agent_id: AgentId = agent_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid agent id: {agent_id}")))?;
    Ok(Json(state.settlement.agent_stats(&auth.user_id, &agent_id)?))
}
