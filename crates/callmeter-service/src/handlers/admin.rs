//! Administration handlers: price list, bonus credits, refunds.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use callmeter_core::{
    fits_scale, BillingError, CallId, CallRecord, EntryId, EntryKind, EntryReference, LedgerEntry,
    RateId, RateRecord, ServiceKind, UserId, MONEY_SCALE,
};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::ledger::Posting;
use crate::rates::RateInput;
use crate::state::AppState;

// ============================================================================
// Rates
// ============================================================================

/// Rate list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListRatesQuery {
    /// Only rates of this service kind.
    #[serde(default)]
    pub kind: Option<ServiceKind>,
    /// Include deactivated records.
    #[serde(default)]
    pub include_inactive: bool,
}

/// Rate list response.
#[derive(Debug, Serialize)]
pub struct ListRatesResponse {
    /// Rate records.
    pub rates: Vec<RateRecord>,
}

/// List rate records.
pub async fn list_rates(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<ListRatesQuery>,
) -> Json<ListRatesResponse> {
    Json(ListRatesResponse {
        rates: state.rates.list_rates(query.kind, query.include_inactive),
    })
}

/// Add a rate, closing the window of the rate it supersedes.
pub async fn upsert_rate(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<RateInput>,
) -> Result<Json<RateRecord>, ApiError> {
    let record = state.rates.upsert_rate(body)?;
    tracing::debug!(admin_id = %admin.admin_id, rate_id = %record.id, "Rate change by admin");
    Ok(Json(record))
}

/// Deactivate a rate record.
pub async fn deactivate_rate(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(rate_id): Path<String>,
) -> Result<Json<RateRecord>, ApiError> {
    let rate_id: RateId = rate_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid rate id: {rate_id}")))?;
    let record = state.rates.deactivate_rate(&rate_id)?;
    tracing::debug!(admin_id = %admin.admin_id, rate_id = %rate_id, "Rate change by admin");
    Ok(Json(record))
}

// ============================================================================
// Credits and refunds
// ============================================================================

/// Bonus credit request.
#[derive(Debug, Deserialize)]
pub struct AdminCreditRequest {
    /// User to credit.
    pub user_id: UserId,
    /// Amount to add.
    pub amount: Decimal,
    /// Description stored on the entry.
    #[serde(default)]
    pub description: Option<String>,
    /// Key making retries of the same grant idempotent.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Credit a user's wallet with a bonus.
pub async fn add_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<AdminCreditRequest>,
) -> Result<Json<LedgerEntry>, ApiError> {
    if !fits_scale(body.amount, MONEY_SCALE) {
        return Err(BillingError::InvalidAmount(format!(
            "credit amounts have at most {MONEY_SCALE} fractional digits: {}",
            body.amount
        ))
        .into());
    }
    let wallet = state.ledger.wallet_for_user(&body.user_id)?;
    let grant = body
        .idempotency_key
        .unwrap_or_else(|| EntryId::generate().to_string());
    let posting = Posting::new(
        EntryKind::Bonus,
        body.amount,
        body.description
            .unwrap_or_else(|| format!("Bonus credit by {}", admin.admin_id)),
        Some(EntryReference::admin(format!("{}:{grant}", admin.admin_id))),
    );

    let posted = state.ledger.credit_once(&wallet.id, &posting).await?;
    tracing::info!(
        admin_id = %admin.admin_id,
        user_id = %body.user_id,
        amount = %body.amount,
        applied = posted.applied,
        "Admin credit"
    );
    Ok(Json(posted.entry))
}

/// Refund request.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Reason stored on the refund entry.
    pub reason: String,
}

/// Refund a settled call.
pub async fn refund_call(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(call_id): Path<String>,
    Json(body): Json<RefundRequest>,
) -> Result<Json<LedgerEntry>, ApiError> {
    let call_id: CallId = call_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid call id: {call_id}")))?;
    tracing::info!(admin_id = %admin.admin_id, call_id = %call_id, "Refund requested");
    Ok(Json(state.settlement.refund_call(&call_id, &body.reason).await?))
}

/// Active calls response.
#[derive(Debug, Serialize)]
pub struct ActiveCallsResponse {
    /// Calls still open or settling.
    pub calls: Vec<CallRecord>,
}

/// List calls that have not finished settling.
pub async fn active_calls(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
) -> Result<Json<ActiveCallsResponse>, ApiError> {
    Ok(Json(ActiveCallsResponse {
        calls: state.settlement.active_calls()?,
    }))
}
