//! Low-balance notifications.
//!
//! The ledger hands alerts to a [`LowBalanceNotifier`] on a spawned task after
//! the debit has committed. Delivery failures are logged and dropped.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use callmeter_core::{AutoRecharge, EntryId, UserId, Wallet, WalletId};

/// Timeout for webhook deliveries.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// A wallet's balance dropped below its threshold.
#[derive(Debug, Clone, Serialize)]
pub struct LowBalanceAlert {
    /// Wallet that crossed the threshold.
    pub wallet_id: WalletId,
    /// Wallet owner.
    pub user_id: UserId,
    /// Balance after the debit.
    pub balance: Decimal,
    /// Configured threshold.
    pub threshold: Decimal,
    /// Wallet currency.
    pub currency: String,
    /// Auto-recharge settings, for a collaborator that tops the wallet up.
    pub auto_recharge: AutoRecharge,
    /// The debit that triggered the alert.
    pub entry_id: EntryId,
    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
}

impl LowBalanceAlert {
    /// Build an alert for a wallet after `entry_id` was committed.
    #[must_use]
    pub fn new(wallet: &Wallet, entry_id: EntryId) -> Self {
        Self {
            wallet_id: wallet.id,
            user_id: wallet.user_id,
            balance: wallet.balance,
            threshold: wallet.low_balance_threshold,
            currency: wallet.currency.clone(),
            auto_recharge: wallet.auto_recharge.clone(),
            entry_id,
            raised_at: Utc::now(),
        }
    }
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The receiver answered with a non-success status.
    #[error("webhook returned status {0}")]
    Status(u16),
}

/// Delivers low-balance alerts.
#[async_trait]
pub trait LowBalanceNotifier: Send + Sync {
    /// Deliver one alert.
    async fn notify(&self, alert: &LowBalanceAlert) -> Result<(), NotifyError>;
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl LowBalanceNotifier for LogNotifier {
    async fn notify(&self, alert: &LowBalanceAlert) -> Result<(), NotifyError> {
        tracing::warn!(
            wallet_id = %alert.wallet_id,
            user_id = %alert.user_id,
            balance = %alert.balance,
            threshold = %alert.threshold,
            auto_recharge = alert.auto_recharge.enabled,
            "Wallet balance below threshold"
        );
        Ok(())
    }
}

/// POSTs alerts as JSON to a configured URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl LowBalanceNotifier for WebhookNotifier {
    async fn notify(&self, alert: &LowBalanceAlert) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        tracing::debug!(wallet_id = %alert.wallet_id, url = %self.url, "Low-balance alert delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert() -> LowBalanceAlert {
        let mut wallet = Wallet::new(UserId::generate(), None);
        wallet.balance = Decimal::new(5, 0);
        LowBalanceAlert::new(&wallet, EntryId::generate())
    }

    #[tokio::test]
    async fn webhook_posts_alert_json() {
        let server = MockServer::start().await;
        let alert = alert();
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .and(body_partial_json(serde_json::json!({
                "wallet_id": alert.wallet_id.to_string(),
                "currency": "USD"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/alerts", server.uri())).unwrap();
        notifier.notify(&alert).await.unwrap();
    }

    #[tokio::test]
    async fn webhook_reports_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri()).unwrap();
        let result = notifier.notify(&alert()).await;
        assert!(matches!(result, Err(NotifyError::Status(500))));
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        assert!(LogNotifier.notify(&alert()).await.is_ok());
    }
}
