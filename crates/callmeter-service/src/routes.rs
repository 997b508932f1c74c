//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, agents, calls, health, topups, wallet, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests on the metering routes.
///
/// Pipeline stages report usage at a high rate for every live call.
const METERING_MAX_CONCURRENT_REQUESTS: usize = 200;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Wallet (JWT auth)
/// - `POST /v1/wallet` - Create the caller's wallet
/// - `GET /v1/wallet` - Get the wallet
/// - `GET /v1/wallet/balance` - Current balance
/// - `POST /v1/wallet/auto-recharge` - Configure auto-recharge
/// - `GET /v1/wallet/transactions` - Ledger history
/// - `GET /v1/wallet/transactions/:id` - One ledger entry
///
/// ## Top-ups (JWT auth)
/// - `POST /v1/topups` - Initiate a top-up
/// - `GET /v1/topups` - Payment history
/// - `GET /v1/topups/:id` - One payment
///
/// ## Calls (JWT auth)
/// - `GET /v1/calls` - Call history
/// - `GET /v1/calls/stats` - Call statistics
/// - `POST /v1/calls/estimate` - Cost estimate
/// - `GET /v1/calls/:id` - One call
/// - `GET /v1/agents/:id/stats` - Agent statistics
///
/// ## Metering (Service API key auth, concurrency-limited)
/// - `POST /v1/service/agents` - Register an agent
/// - `POST /v1/service/calls` - Start a call
/// - `GET /v1/service/calls/:id` - Get a call
/// - `POST /v1/service/calls/:id/usage` - Report usage
/// - `POST /v1/service/calls/:id/usage/batch` - Report several usage increments
/// - `POST /v1/service/calls/:id/end` - End and settle a call
///
/// ## Administration (Admin API key auth)
/// - `GET|POST /v1/admin/rates` - List or add rates
/// - `DELETE /v1/admin/rates/:id` - Deactivate a rate
/// - `POST /v1/admin/credits` - Bonus credit
/// - `POST /v1/admin/calls/:id/refund` - Refund a call
/// - `GET /v1/admin/calls/active` - Calls not yet settled
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/payments` - Payment provider events
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    // Metering routes (service auth), with their own concurrency limit
    let metering_routes = Router::new()
        .route("/v1/service/agents", post(agents::register_agent))
        .route("/v1/service/calls", post(calls::start_call))
        .route("/v1/service/calls/:id", get(calls::get_service_call))
        .route("/v1/service/calls/:id/usage", post(calls::report_usage))
        .route(
            "/v1/service/calls/:id/usage/batch",
            post(calls::report_usage_batch),
        )
        .route("/v1/service/calls/:id/end", post(calls::end_call))
        .layer(ConcurrencyLimitLayer::new(METERING_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // Wallet
        .route(
            "/v1/wallet",
            post(wallet::create_wallet).get(wallet::get_wallet),
        )
        .route("/v1/wallet/balance", get(wallet::get_balance))
        .route(
            "/v1/wallet/auto-recharge",
            post(wallet::configure_auto_recharge),
        )
        .route("/v1/wallet/transactions", get(wallet::list_transactions))
        .route(
            "/v1/wallet/transactions/:id",
            get(wallet::get_transaction),
        )
        // Top-ups
        .route(
            "/v1/topups",
            post(topups::initiate_topup).get(topups::list_topups),
        )
        .route("/v1/topups/:id", get(topups::get_topup))
        // Calls (user view)
        .route("/v1/calls", get(calls::list_calls))
        .route("/v1/calls/stats", get(calls::call_statistics))
        .route("/v1/calls/estimate", post(calls::estimate_call))
        .route("/v1/calls/:id", get(calls::get_call))
        .route("/v1/agents/:id/stats", get(agents::agent_stats))
        // Metering
        .merge(metering_routes)
        // Administration
        .route(
            "/v1/admin/rates",
            get(admin::list_rates).post(admin::upsert_rate),
        )
        .route("/v1/admin/rates/:id", delete(admin::deactivate_rate))
        .route("/v1/admin/credits", post(admin::add_credits))
        .route("/v1/admin/calls/active", get(admin::active_calls))
        .route("/v1/admin/calls/:id/refund", post(admin::refund_call))
        // Webhooks
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
