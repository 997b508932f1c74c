//! Rate administration and pricing integration tests.

mod common;

use common::{dec, TestHarness, ADMIN_API_KEY};
use serde_json::{json, Value};

#[tokio::test]
async fn default_rates_are_seeded() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/admin/rates")
        .add_header("x-admin-key", ADMIN_API_KEY)
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["rates"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn rates_require_admin_key() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/admin/rates")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn upsert_supersedes_and_prices_new_calls() {
    let harness = TestHarness::with_funded_wallet("10").await;

    let response = harness
        .server
        .post("/v1/admin/rates")
        .add_header("x-admin-key", ADMIN_API_KEY)
        .json(&json!({
            "kind": "telephony",
            "provider": "twilio",
            "cost_per_unit": "0.020000"
        }))
        .await;
    response.assert_status_ok();
    let record: Value = response.json();
    assert_eq!(record["unit_type"], "per_minute");

    let telephony: Value = harness
        .server
        .get("/v1/admin/rates?kind=telephony&include_inactive=true")
        .add_header("x-admin-key", ADMIN_API_KEY)
        .await
        .json();
    let twilio: Vec<&Value> = telephony["rates"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["provider"] == "twilio")
        .collect();
    assert_eq!(twilio.len(), 2);
    assert!(twilio
        .iter()
        .any(|r| r["id"] != record["id"] && !r["effective_until"].is_null()));

    let call_id = harness.start_call().await;
    let call: Value = harness.end_call(&call_id, 60).await.json();
    assert_eq!(dec(call["cost"]["telephony_cost"].as_str().unwrap()), dec("0.02"));
}

#[tokio::test]
async fn mismatched_unit_is_rejected() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/admin/rates")
        .add_header("x-admin-key", ADMIN_API_KEY)
        .json(&json!({
            "kind": "tts",
            "provider": "elevenlabs",
            "cost_per_unit": "30",
            "unit_type": "per_minute"
        }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn deactivate_unknown_rate_is_not_found() {
    let harness = TestHarness::new();

    harness
        .server
        .delete(&format!("/v1/admin/rates/{}", callmeter_core::RateId::generate()))
        .add_header("x-admin-key", ADMIN_API_KEY)
        .await
        .assert_status_not_found();
}
