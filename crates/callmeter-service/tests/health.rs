//! Health endpoint integration tests.

mod common;

use common::TestHarness;

#[tokio::test]
async fn health_check_returns_ok() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "callmeter");
    assert_eq!(body["open_calls"], 0);
}

#[tokio::test]
async fn health_counts_open_calls() {
    let harness = TestHarness::with_funded_wallet("10").await;
    harness.start_call().await;

    let body: serde_json::Value = harness.server.get("/health").await.json();
    assert_eq!(body["open_calls"], 1);
}
