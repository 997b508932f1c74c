//! Client behavior against a mocked metering API.

use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callmeter_client::{
    CallMeterClient, CallState, ClientError, ClientOptions, StartCallRequest, UsageReport,
};
use callmeter_core::{
    AgentId, CallDirection, CallId, CallRecord, ProviderSelection, UsageKind, UserId, WalletId,
};

const API_KEY: &str = "svc-key";

fn client(server: &MockServer) -> CallMeterClient {
    CallMeterClient::with_options(
        server.uri(),
        API_KEY,
        ClientOptions::with_service_name("orchestrator"),
    )
    .unwrap()
}

fn open_call() -> CallRecord {
    CallRecord::open(
        UserId::generate(),
        WalletId::generate(),
        AgentId::generate(),
        "+15550100".into(),
        CallDirection::Outbound,
        ProviderSelection::default(),
        None,
    )
}

fn error_body(code: &str, message: &str) -> serde_json::Value {
    json!({ "error": { "code": code, "message": message } })
}

#[tokio::test]
async fn start_call_sends_service_headers() {
    let server = MockServer::start().await;
    let call = open_call();
    Mock::given(method("POST"))
        .and(path("/v1/service/calls"))
        .and(header("x-api-key", API_KEY))
        .and(header("x-service-name", "orchestrator"))
        .and(body_json(json!({
            "user_id": call.user_id.to_string(),
            "agent_id": call.agent_id.to_string(),
            "phone_number": "+15550100",
            "direction": "outbound"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(&call))
        .expect(1)
        .mount(&server)
        .await;

    let started = client(&server)
        .start_call(&StartCallRequest {
            user_id: call.user_id,
            agent_id: call.agent_id,
            phone_number: "+15550100".into(),
            direction: CallDirection::Outbound,
        })
        .await
        .unwrap();

    assert_eq!(started.id, call.id);
    assert_eq!(started.state, CallState::Open);
}

#[tokio::test]
async fn report_usage_returns_running_total() {
    let server = MockServer::start().await;
    let call_id = CallId::generate();
    Mock::given(method("POST"))
        .and(path(format!("/v1/service/calls/{call_id}/usage")))
        .and(body_json(json!({ "kind": "tts_characters", "quantity": 120 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "call_id": call_id.to_string(),
            "kind": "tts_characters",
            "total": 240
        })))
        .mount(&server)
        .await;

    let response = client(&server)
        .report_usage(&call_id, UsageKind::TtsCharacters, 120)
        .await
        .unwrap();

    assert_eq!(response.total, 240);
    assert_eq!(response.kind, UsageKind::TtsCharacters);
}

#[tokio::test]
async fn batch_report_posts_all_reports() {
    let server = MockServer::start().await;
    let call_id = CallId::generate();
    Mock::given(method("POST"))
        .and(path(format!("/v1/service/calls/{call_id}/usage/batch")))
        .and(body_json(json!({ "reports": [
            { "kind": "llm_input_tokens", "quantity": 300 },
            { "kind": "llm_output_tokens", "quantity": 200 }
        ]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [
            { "call_id": call_id.to_string(), "kind": "llm_input_tokens", "total": 300 },
            { "call_id": call_id.to_string(), "kind": "llm_output_tokens", "total": 200 }
        ]})))
        .mount(&server)
        .await;

    let response = client(&server)
        .report_usage_batch(
            &call_id,
            &[
                UsageReport::new(UsageKind::LlmInputTokens, 300),
                UsageReport::new(UsageKind::LlmOutputTokens, 200),
            ],
        )
        .await
        .unwrap();

    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[1].total, 200);
}

#[tokio::test]
async fn late_usage_maps_to_call_closed() {
    let server = MockServer::start().await;
    let call_id = CallId::generate();
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(error_body("conflict", "call already closed")),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .report_usage(&call_id, UsageKind::SttSeconds, 5)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::CallClosed(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn insufficient_funds_carries_amounts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "code": "insufficient_funds",
                "message": "insufficient funds",
                "details": { "available": "0.0100", "required": "0.0470" }
            }
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .end_call(&CallId::generate(), 120)
        .await
        .unwrap_err();

    match err {
        ClientError::InsufficientFunds { available, required } => {
            assert_eq!(available, "0.01".parse::<Decimal>().unwrap());
            assert_eq!(required, "0.047".parse::<Decimal>().unwrap());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn typed_errors_by_code() {
    let server = MockServer::start().await;
    let missing = CallId::generate();
    let busy = CallId::generate();
    Mock::given(method("GET"))
        .and(path(format!("/v1/service/calls/{missing}")))
        .respond_with(ResponseTemplate::new(404).set_body_json(error_body("not_found", "call")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/service/calls/{busy}/end")))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(error_body("service_busy", "wallet locked")),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/service/calls"))
        .respond_with(ResponseTemplate::new(422).set_body_json(error_body(
            "pricing_not_configured",
            "no telephony rate for twilio",
        )))
        .mount(&server)
        .await;

    let client = client(&server);

    assert!(matches!(
        client.get_call(&missing).await.unwrap_err(),
        ClientError::NotFound(_)
    ));

    let err = client.end_call(&busy, 60).await.unwrap_err();
    assert!(matches!(err, ClientError::Busy(_)));
    assert!(err.is_retryable());

    let err = client
        .start_call(&StartCallRequest {
            user_id: UserId::generate(),
            agent_id: AgentId::generate(),
            phone_number: "+15550100".into(),
            direction: CallDirection::Inbound,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::PricingNotConfigured(_)));
}

#[tokio::test]
async fn unparseable_error_body_keeps_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_call(&CallId::generate())
        .await
        .unwrap_err();

    match &err {
        ClientError::Api { code, status, .. } => {
            assert_eq!(code, "unknown");
            assert_eq!(*status, 502);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
}
