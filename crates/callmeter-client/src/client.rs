//! Callmeter HTTP client implementation.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use callmeter_core::{CallId, UsageKind};

use crate::error::ClientError;
use crate::types::{
    AgentProfile, ApiErrorResponse, CallRecord, EndCallRequest, RegisterAgentRequest,
    StartCallRequest, UsageBatchRequest, UsageBatchResponse, UsageReport, UsageResponse,
};

/// Callmeter metering API client.
///
/// Authenticates with the service API key; every request carries the
/// configured service name.
#[derive(Debug, Clone)]
pub struct CallMeterClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl CallMeterClient {
    /// Create a client with default options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a client with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is empty or the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ClientError::Configuration("API key is empty".into()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            service_name: options.service_name,
        })
    }

    /// Register an agent, or update its provider selection.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn register_agent(
        &self,
        request: &RegisterAgentRequest,
    ) -> Result<AgentProfile, ClientError> {
        let url = format!("{}/v1/service/agents", self.base_url);
        self.send(self.client.post(&url).json(request)).await
    }

    /// Open a call.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::PricingNotConfigured`] when the agent's providers
    /// have no rate, [`ClientError::NotFound`] for an unknown agent or wallet.
    pub async fn start_call(&self, request: &StartCallRequest) -> Result<CallRecord, ClientError> {
        let url = format!("{}/v1/service/calls", self.base_url);
        self.send(self.client.post(&url).json(request)).await
    }

    /// Add usage to an open call.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::CallClosed`] when the call has already ended.
    pub async fn report_usage(
        &self,
        call_id: &CallId,
        kind: UsageKind,
        quantity: u64,
    ) -> Result<UsageResponse, ClientError> {
        let url = format!("{}/v1/service/calls/{call_id}/usage", self.base_url);
        let report = UsageReport::new(kind, quantity);
        self.send(self.client.post(&url).json(&report)).await
    }

    /// Add several usage increments to an open call.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    /// Reports before a rejected one stay applied.
    pub async fn report_usage_batch(
        &self,
        call_id: &CallId,
        reports: &[UsageReport],
    ) -> Result<UsageBatchResponse, ClientError> {
        let url = format!("{}/v1/service/calls/{call_id}/usage/batch", self.base_url);
        let request = UsageBatchRequest { reports };
        self.send(self.client.post(&url).json(&request)).await
    }

    /// End a call and settle it.
    ///
    /// A call the wallet could not pay for comes back with state `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::CallClosed`] when the call was already ended and
    /// [`ClientError::Busy`] when the wallet was locked; the call is then
    /// settled later by the service.
    pub async fn end_call(
        &self,
        call_id: &CallId,
        duration_seconds: u64,
    ) -> Result<CallRecord, ClientError> {
        let url = format!("{}/v1/service/calls/{call_id}/end", self.base_url);
        let request = EndCallRequest { duration_seconds };
        self.send(self.client.post(&url).json(&request)).await
    }

    /// Fetch a call.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_call(&self, call_id: &CallId) -> Result<CallRecord, ClientError> {
        let url = format!("{}/v1/service/calls/{call_id}", self.base_url);
        self.send(self.client.get(&url)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let Ok(api_error) = response.json::<ApiErrorResponse>().await else {
            return Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            });
        };

        let detail = api_error.error;
        tracing::debug!(status = status.as_u16(), code = %detail.code, "Callmeter API error");

        match detail.code.as_str() {
            "insufficient_funds" => {
                let amount = |field: &str| {
                    detail
                        .details
                        .as_ref()
                        .and_then(|d| d.get(field))
                        .and_then(serde_json::Value::as_str)
                        .and_then(|s| s.parse::<Decimal>().ok())
                        .unwrap_or_default()
                };
                Err(ClientError::InsufficientFunds {
                    available: amount("available"),
                    required: amount("required"),
                })
            }
            "conflict" => Err(ClientError::CallClosed(detail.message)),
            "pricing_not_configured" => Err(ClientError::PricingNotConfigured(detail.message)),
            "not_found" => Err(ClientError::NotFound(detail.message)),
            "service_busy" => Err(ClientError::Busy(detail.message)),
            _ => Err(ClientError::Api {
                code: detail.code,
                message: detail.message,
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 10).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}
