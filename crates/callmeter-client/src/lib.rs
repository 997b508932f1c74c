//! Callmeter Client SDK.
//!
//! Used by the call orchestrator and the voice pipeline stages to open calls,
//! report usage as it happens and settle calls when they end.
//!
//! # Example
//!
//! ```no_run
//! use callmeter_client::{CallMeterClient, ClientOptions, StartCallRequest};
//! use callmeter_core::{AgentId, CallDirection, UsageKind, UserId};
//!
//! # async fn example() -> Result<(), callmeter_client::ClientError> {
//! let client = CallMeterClient::with_options(
//!     "http://callmeter.billing.svc:8080",
//!     "your-service-api-key",
//!     ClientOptions::with_service_name("voice-orchestrator"),
//! )?;
//!
//! let call = client
//!     .start_call(&StartCallRequest {
//!         user_id: UserId::generate(),
//!         agent_id: AgentId::generate(),
//!         phone_number: "+15550100".into(),
//!         direction: CallDirection::Inbound,
//!     })
//!     .await?;
//!
//! client.report_usage(&call.id, UsageKind::LlmInputTokens, 300).await?;
//! let settled = client.end_call(&call.id, 120).await?;
//! println!("Call cost: {:?}", settled.cost.map(|c| c.total_cost));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{CallMeterClient, ClientOptions};
pub use error::ClientError;
pub use types::*;
