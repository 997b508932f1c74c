//! Application state.

use std::sync::Arc;
use std::time::Duration;

use callmeter_core::Result;
use callmeter_store::Store;

use crate::accumulator::UsageAccumulator;
use crate::config::ServiceConfig;
use crate::ledger::Ledger;
use crate::notify::{LogNotifier, LowBalanceNotifier, WebhookNotifier};
use crate::rates::RateTable;
use crate::settlement::SettlementEngine;
use crate::sweeper::StaleCallSweeper;
use crate::topup::TopupIntake;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Effective-dated price list.
    pub rates: Arc<RateTable>,

    /// Live usage counters of open calls.
    pub meters: Arc<UsageAccumulator>,

    /// Wallet ledger.
    pub ledger: Arc<Ledger>,

    /// Call lifecycle and settlement.
    pub settlement: Arc<SettlementEngine>,

    /// Top-up payments.
    pub topups: Arc<TopupIntake>,
}

impl AppState {
    /// Create the application state, choosing the low-balance notifier from
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the rate table cannot be loaded or seeded.
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self> {
        let notifier: Arc<dyn LowBalanceNotifier> = match &config.low_balance_webhook_url {
            Some(url) => match WebhookNotifier::new(url.clone()) {
                Ok(notifier) => {
                    tracing::info!(url = %url, "Low-balance webhook enabled");
                    Arc::new(notifier)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Cannot build low-balance webhook client, logging alerts instead");
                    Arc::new(LogNotifier)
                }
            },
            None => {
                tracing::info!("Low-balance webhook not configured - alerts will be logged");
                Arc::new(LogNotifier)
            }
        };

        Self::with_notifier(store, config, notifier)
    }

    /// Create the application state with an explicit notifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the rate table cannot be loaded or seeded.
    pub fn with_notifier(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        notifier: Arc<dyn LowBalanceNotifier>,
    ) -> Result<Self> {
        let rates = Arc::new(RateTable::load(store.clone())?);
        if config.seed_default_rates {
            rates.seed_default_rates()?;
        }

        let meters = Arc::new(UsageAccumulator::new());
        let ledger = Arc::new(Ledger::new(store.clone(), config.ledger_config(), notifier));
        let settlement = Arc::new(SettlementEngine::new(
            store.clone(),
            rates.clone(),
            meters.clone(),
            ledger.clone(),
            config.settlement_config(),
        ));
        let topups = Arc::new(TopupIntake::new(
            store.clone(),
            ledger.clone(),
            config.topup_limits(),
        ));

        if config.payment_webhook_secret.is_none() {
            tracing::warn!("Payment webhook secret not configured - payment webhooks will be rejected");
        }

        Ok(Self {
            store,
            config,
            rates,
            meters,
            ledger,
            settlement,
            topups,
        })
    }

    /// Build the stale call sweeper for this state.
    #[must_use]
    pub fn sweeper(&self) -> StaleCallSweeper {
        StaleCallSweeper::new(
            self.settlement.clone(),
            Duration::from_secs(self.config.stale_call_after_seconds),
            Duration::from_secs(self.config.sweep_interval_seconds.max(1)),
        )
    }
}
