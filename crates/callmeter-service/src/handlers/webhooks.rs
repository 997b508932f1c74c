//! Payment provider webhook handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use callmeter_core::{BillingError, PaymentOutcome};

use crate::crypto::verify_payment_signature;
use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "payment-signature";

/// Payment webhook payload.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    /// Event ID.
    pub id: String,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: PaymentEventData,
}

/// Payment event data.
#[derive(Debug, Deserialize)]
pub struct PaymentEventData {
    /// Reference given when the top-up was initiated.
    pub reference: String,
    /// Failure reason for `payment.failed`.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
}

/// Handle payment provider webhooks.
///
/// Unknown event types and unknown references are acknowledged so the
/// provider stops redelivering them. A busy wallet answers 503 so the
/// provider retries.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Some(secret) = state.config.payment_webhook_secret.as_deref() else {
        tracing::warn!("Payment webhook received but no secret is configured - rejecting");
        return Err(ApiError::Unauthorized);
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing payment signature".into()))?;

    verify_payment_signature(
        secret,
        signature,
        &body,
        state.config.webhook_tolerance_seconds,
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "Invalid payment webhook signature");
        ApiError::BadRequest("Invalid webhook signature".into())
    })?;

    let webhook: PaymentWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %webhook.event_type,
        event_id = %webhook.id,
        reference = %webhook.data.reference,
        "Received payment webhook"
    );

    let outcome = match webhook.event_type.as_str() {
        "payment.succeeded" => PaymentOutcome::Succeeded,
        "payment.failed" => PaymentOutcome::Failed {
            reason: webhook.data.reason,
        },
        _ => {
            tracing::debug!(event_type = %webhook.event_type, "Unhandled payment event");
            return Ok(Json(WebhookResponse { received: true }));
        }
    };

    match state.topups.confirm(&webhook.data.reference, outcome).await {
        Ok(_) => {}
        Err(BillingError::PaymentNotFound(reference)) => {
            tracing::warn!(
                event_id = %webhook.id,
                reference = %reference,
                "Payment webhook for unknown reference"
            );
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Json(WebhookResponse { received: true }))
}
