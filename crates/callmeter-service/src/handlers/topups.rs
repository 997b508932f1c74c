//! Top-up handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use callmeter_core::{PaymentId, PaymentRecord};

use super::PageQuery;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Initiate top-up request.
#[derive(Debug, Deserialize)]
pub struct InitiateTopupRequest {
    /// Amount to add, at most two fractional digits.
    pub amount: Decimal,
    /// Currency; defaults to the wallet currency.
    #[serde(default)]
    pub currency: Option<String>,
    /// Payment-provider reference to match the confirmation webhook.
    #[serde(default)]
    pub reference: Option<String>,
}

/// Initiate a top-up. The wallet is credited when the payment webhook
/// confirms it.
pub async fn initiate_topup(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<InitiateTopupRequest>,
) -> Result<Json<PaymentRecord>, ApiError> {
    let wallet = state.ledger.wallet_for_user(&auth.user_id)?;
    let currency = body.currency.unwrap_or_else(|| wallet.currency.clone());

    tracing::info!(
        user_id = %auth.user_id,
        amount = %body.amount,
        currency = %currency,
        "Initiating top-up"
    );

    let payment = state
        .topups
        .initiate(&wallet.id, body.amount, &currency, body.reference)?;
    Ok(Json(payment))
}

/// List payments response.
#[derive(Debug, Serialize)]
pub struct ListPaymentsResponse {
    /// Payments, newest first.
    pub payments: Vec<PaymentRecord>,
}

/// List the caller's payments.
pub async fn list_topups(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListPaymentsResponse>, ApiError> {
    let payments = state
        .topups
        .list_payments(&auth.user_id, query.limit, query.offset)?;
    Ok(Json(ListPaymentsResponse { payments }))
}

/// Get one of the caller's payments.
pub async fn get_topup(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentRecord>, ApiError> {
    let payment_id: PaymentId = payment_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid payment id: {payment_id}")))?;
    Ok(Json(state.topups.get_payment(&auth.user_id, &payment_id)?))
}
