//! Wallet, balance and ledger history integration tests.

mod common;

use axum::http::StatusCode;
use common::{dec, TestHarness, ADMIN_API_KEY};
use serde_json::json;

// ============================================================================
// Wallet
// ============================================================================

#[tokio::test]
async fn create_wallet_defaults() {
    let harness = TestHarness::new();

    let wallet = harness.create_wallet().await;
    assert_eq!(wallet["user_id"], harness.test_user_id.to_string());
    assert_eq!(wallet["currency"], "USD");
    assert_eq!(dec(wallet["balance"].as_str().unwrap()), dec("0"));
    assert_eq!(dec(wallet["low_balance_threshold"].as_str().unwrap()), dec("10"));
}

#[tokio::test]
async fn create_wallet_twice_conflicts() {
    let harness = TestHarness::new();
    harness.create_wallet().await;

    let response = harness
        .server
        .post("/v1/wallet")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({}))
        .await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn get_balance_without_wallet_fails() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/wallet/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn get_balance_without_auth_fails() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/wallet/balance")
        .await
        .assert_status_unauthorized();

    harness
        .server
        .get("/v1/wallet/balance")
        .add_header("authorization", "Bearer not-a-jwt")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn balance_reflects_admin_credit() {
    let harness = TestHarness::new();
    harness.create_wallet().await;
    harness.admin_credit(harness.test_user_id, "12.50").await;

    assert_eq!(harness.balance().await, dec("12.50"));

    let body: serde_json::Value = harness
        .server
        .get("/v1/wallet/balance")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(body["below_threshold"], false);
}

#[tokio::test]
async fn configure_auto_recharge() {
    let harness = TestHarness::new();
    harness.create_wallet().await;

    let response = harness
        .server
        .post("/v1/wallet/auto-recharge")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "enabled": true, "amount": "25.00", "threshold": "5" }))
        .await;

    response.assert_status_ok();
    let wallet: serde_json::Value = response.json();
    assert_eq!(wallet["auto_recharge"]["enabled"], true);
    assert_eq!(dec(wallet["auto_recharge"]["amount"].as_str().unwrap()), dec("25"));
    assert_eq!(dec(wallet["low_balance_threshold"].as_str().unwrap()), dec("5"));
}

#[tokio::test]
async fn auto_recharge_requires_amount() {
    let harness = TestHarness::new();
    harness.create_wallet().await;

    harness
        .server
        .post("/v1/wallet/auto-recharge")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "enabled": true }))
        .await
        .assert_status_bad_request();
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn list_transactions_newest_first() {
    let harness = TestHarness::new();
    harness.create_wallet().await;
    harness.admin_credit(harness.test_user_id, "1").await;
    harness.admin_credit(harness.test_user_id, "2").await;

    let response = harness
        .server
        .get("/v1/wallet/transactions?limit=1")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let page: serde_json::Value = response.json();
    let transactions = page["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(page["has_more"], true);
    assert_eq!(transactions[0]["kind"], "bonus");
    assert_eq!(dec(transactions[0]["amount"].as_str().unwrap()), dec("2"));
    assert_eq!(dec(transactions[0]["balance_after"].as_str().unwrap()), dec("3"));
}

#[tokio::test]
async fn get_transaction_checks_owner() {
    let harness = TestHarness::new();
    harness.create_wallet().await;
    let entry = harness.admin_credit(harness.test_user_id, "1").await;
    let path = format!("/v1/wallet/transactions/{}", entry["id"].as_str().unwrap());

    harness
        .server
        .get(&path)
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_ok();

    harness
        .server
        .get(&path)
        .add_header("authorization", TestHarness::other_user_auth_header())
        .await
        .assert_status_not_found();
}

// ============================================================================
// Admin credit
// ============================================================================

#[tokio::test]
async fn admin_credit_is_idempotent_per_key() {
    let harness = TestHarness::new();
    harness.create_wallet().await;

    let grant = json!({
        "user_id": harness.test_user_id.to_string(),
        "amount": "5",
        "idempotency_key": "promo-2024"
    });
    let first: serde_json::Value = harness
        .server
        .post("/v1/admin/credits")
        .add_header("x-admin-key", ADMIN_API_KEY)
        .json(&grant)
        .await
        .json();
    let second: serde_json::Value = harness
        .server
        .post("/v1/admin/credits")
        .add_header("x-admin-key", ADMIN_API_KEY)
        .json(&grant)
        .await
        .json();

    assert_eq!(first["id"], second["id"]);
    assert_eq!(harness.balance().await, dec("5"));
}

#[tokio::test]
async fn admin_credit_requires_admin_key() {
    let harness = TestHarness::new();
    harness.create_wallet().await;

    harness
        .server
        .post("/v1/admin/credits")
        .add_header("x-admin-key", "wrong")
        .json(&json!({ "user_id": harness.test_user_id.to_string(), "amount": "5" }))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn admin_credit_rejects_excess_precision() {
    let harness = TestHarness::new();
    harness.create_wallet().await;

    harness
        .server
        .post("/v1/admin/credits")
        .add_header("x-admin-key", ADMIN_API_KEY)
        .json(&json!({ "user_id": harness.test_user_id.to_string(), "amount": "1.00001" }))
        .await
        .assert_status_bad_request();

    assert_eq!(harness.balance().await, dec("0"));
}
