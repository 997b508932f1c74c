//! Common test utilities for callmeter integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use callmeter_core::{AgentId, UserId};
use callmeter_service::auth::JwtClaims;
use callmeter_service::crypto::sign_payment_payload;
use callmeter_service::{create_router, AppState, ServiceConfig};
use callmeter_store::{MemoryStore, Store};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const AUDIENCE: &str = "callmeter";
pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Parse a decimal literal.
pub fn dec(s: &str) -> Decimal {
    s.parse().expect("decimal literal")
}

/// Configuration used by every harness.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        service_api_key: Some(SERVICE_API_KEY.into()),
        admin_api_key: Some(ADMIN_API_KEY.into()),
        auth_jwt_secret: Some(JWT_SECRET.into()),
        auth_audience: AUDIENCE.into(),
        payment_webhook_secret: Some(WEBHOOK_SECRET.into()),
        seed_default_rates: true,
        ..ServiceConfig::default()
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The application state behind the server.
    pub state: AppState,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
    /// An agent registered to the test user (after `with_funded_wallet`).
    pub agent_id: AgentId,
}

impl TestHarness {
    /// Create a new test harness with a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Create a harness with custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    /// Create a harness over an existing store.
    pub fn with_store(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let state = AppState::new(store, config).expect("Failed to build state");
        let router: Router = create_router(state.clone());
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            state,
            test_user_id: UserId::generate(),
            agent_id: AgentId::generate(),
        }
    }

    /// Create a harness whose test user has a wallet holding `balance` and a
    /// registered agent with the default providers.
    pub async fn with_funded_wallet(balance: &str) -> Self {
        let harness = Self::new();
        harness.create_wallet().await;
        if balance != "0" {
            harness.admin_credit(harness.test_user_id, balance).await;
        }
        harness.register_agent(harness.agent_id, harness.test_user_id).await;
        harness
    }

    /// Mint a user token.
    pub fn token_for(user_id: UserId) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = JwtClaims {
            sub: user_id.to_string(),
            aud: AUDIENCE.into(),
            exp: now + 3600,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("Failed to mint token")
    }

    /// Get the authorization header for the test user.
    pub fn user_auth_header(&self) -> String {
        format!("Bearer {}", Self::token_for(self.test_user_id))
    }

    /// Get a different user's auth header (for testing isolation).
    pub fn other_user_auth_header() -> String {
        format!("Bearer {}", Self::token_for(UserId::generate()))
    }

    /// Create the test user's wallet.
    pub async fn create_wallet(&self) -> Value {
        let response = self
            .server
            .post("/v1/wallet")
            .add_header("authorization", self.user_auth_header())
            .json(&json!({}))
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// Grant a bonus credit to a user.
    pub async fn admin_credit(&self, user_id: UserId, amount: &str) -> Value {
        let response = self
            .server
            .post("/v1/admin/credits")
            .add_header("x-admin-key", ADMIN_API_KEY)
            .json(&json!({ "user_id": user_id.to_string(), "amount": amount }))
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// Register an agent through the service API.
    pub async fn register_agent(&self, agent_id: AgentId, user_id: UserId) {
        self.server
            .post("/v1/service/agents")
            .add_header("x-api-key", SERVICE_API_KEY)
            .json(&json!({
                "agent_id": agent_id.to_string(),
                "user_id": user_id.to_string()
            }))
            .await
            .assert_status_ok();
    }

    /// Start a call for the test user's agent and return its id.
    pub async fn start_call(&self) -> String {
        let response = self
            .server
            .post("/v1/service/calls")
            .add_header("x-api-key", SERVICE_API_KEY)
            .json(&json!({
                "user_id": self.test_user_id.to_string(),
                "agent_id": self.agent_id.to_string(),
                "phone_number": "+15550100",
                "direction": "inbound"
            }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        body["id"].as_str().expect("call id").to_string()
    }

    /// Report one usage increment.
    pub async fn report(&self, call_id: &str, kind: &str, quantity: u64) -> axum_test::TestResponse {
        self.server
            .post(&format!("/v1/service/calls/{call_id}/usage"))
            .add_header("x-api-key", SERVICE_API_KEY)
            .json(&json!({ "kind": kind, "quantity": quantity }))
            .await
    }

    /// Report the usage of the reference two-minute call.
    pub async fn report_reference_usage(&self, call_id: &str) {
        for (kind, quantity) in [
            ("llm_input_tokens", 300),
            ("llm_output_tokens", 200),
            ("tts_characters", 240),
            ("stt_seconds", 120),
        ] {
            self.report(call_id, kind, quantity).await.assert_status_ok();
        }
    }

    /// End a call.
    pub async fn end_call(&self, call_id: &str, duration_seconds: u64) -> axum_test::TestResponse {
        self.server
            .post(&format!("/v1/service/calls/{call_id}/end"))
            .add_header("x-api-key", SERVICE_API_KEY)
            .json(&json!({ "duration_seconds": duration_seconds }))
            .await
    }

    /// Current balance of the test user, as the API reports it.
    pub async fn balance(&self) -> Decimal {
        let response = self
            .server
            .get("/v1/wallet/balance")
            .add_header("authorization", self.user_auth_header())
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        dec(body["balance"].as_str().expect("balance"))
    }

    /// Deliver a signed payment webhook.
    pub async fn send_payment_webhook(&self, body: &Value) -> axum_test::TestResponse {
        let raw = body.to_string();
        let signature = sign_payment_payload(WEBHOOK_SECRET, chrono::Utc::now().timestamp(), &raw);
        self.server
            .post("/webhooks/payments")
            .add_header("payment-signature", signature)
            .text(raw)
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
