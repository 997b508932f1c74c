//! Wallet, balance and ledger history handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use callmeter_core::{EntryId, LedgerEntry, Wallet};

use super::PageQuery;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::TransactionPage;
use crate::state::AppState;

/// Create wallet request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateWalletRequest {
    /// ISO 4217 currency code (default: USD).
    #[serde(default)]
    pub currency: Option<String>,
}

/// Create the caller's wallet.
pub async fn create_wallet(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateWalletRequest>,
) -> Result<Json<Wallet>, ApiError> {
    let wallet = state
        .ledger
        .create_wallet(auth.user_id, body.currency.as_deref())?;
    Ok(Json(wallet))
}

/// Get the caller's wallet.
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Wallet>, ApiError> {
    Ok(Json(state.ledger.wallet_for_user(&auth.user_id)?))
}

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Current balance.
    pub balance: Decimal,
    /// Wallet currency.
    pub currency: String,
    /// Low-balance threshold.
    pub low_balance_threshold: Decimal,
    /// Whether the balance is below the threshold.
    pub below_threshold: bool,
}

/// Get current balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let wallet = state.ledger.wallet_for_user(&auth.user_id)?;
    Ok(Json(BalanceResponse {
        balance: wallet.balance,
        below_threshold: wallet.is_below_threshold(),
        currency: wallet.currency,
        low_balance_threshold: wallet.low_balance_threshold,
    }))
}

/// Auto-recharge settings request.
#[derive(Debug, Deserialize)]
pub struct AutoRechargeRequest {
    /// Whether auto-recharge is on.
    pub enabled: bool,
    /// Amount to recharge.
    #[serde(default)]
    pub amount: Option<Decimal>,
    /// New low-balance threshold.
    #[serde(default)]
    pub threshold: Option<Decimal>,
}

/// Configure auto-recharge.
pub async fn configure_auto_recharge(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<AutoRechargeRequest>,
) -> Result<Json<Wallet>, ApiError> {
    let wallet = state
        .ledger
        .update_auto_recharge(&auth.user_id, body.enabled, body.amount, body.threshold)
        .await?;
    Ok(Json(wallet))
}

/// List ledger history, newest first.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<TransactionPage>, ApiError> {
    let page = state
        .ledger
        .list_transactions(&auth.user_id, query.limit, query.offset)?;
    Ok(Json(page))
}

/// Get one ledger entry.
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(entry_id): Path<String>,
) -> Result<Json<LedgerEntry>, ApiError> {
    let entry_id: EntryId = entry_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid transaction id: {entry_id}")))?;
    Ok(Json(state.ledger.get_transaction(&auth.user_id, &entry_id)?))
}
