//! Service configuration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use callmeter_core::DEFAULT_PLATFORM_FEE_PERCENTAGE;

use crate::ledger::LedgerConfig;
use crate::settlement::{PricingMode, SettlementConfig};
use crate::topup::TopupLimits;

/// Where records are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    /// In-process maps; lost on restart.
    #[default]
    Memory,
    /// `RocksDB` under `data_dir`.
    Rocksdb,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" => Ok(Self::Rocksdb),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to the `RocksDB` data directory (default: "/data/callmeter").
    pub data_dir: String,

    /// Storage backend (default: memory).
    pub storage_backend: StorageBackend,

    /// API key for pipeline and orchestrator requests.
    pub service_api_key: Option<String>,

    /// API key for rate and credit administration.
    pub admin_api_key: Option<String>,

    /// HS256 secret for user JWTs.
    pub auth_jwt_secret: Option<String>,

    /// Expected JWT audience (default: "callmeter").
    pub auth_audience: String,

    /// Shared secret for payment webhook signatures.
    pub payment_webhook_secret: Option<String>,

    /// Accepted age of a webhook signature timestamp.
    pub webhook_tolerance_seconds: u64,

    /// Platform fee in percent (default: 7.00).
    pub platform_fee_percentage: Decimal,

    /// When call rates are resolved.
    pub pricing_mode: PricingMode,

    /// Wallet lock wait per attempt, in milliseconds.
    pub ledger_lock_timeout_ms: u64,

    /// Ledger retries after a busy wallet.
    pub ledger_max_retries: u32,

    /// First ledger backoff, in milliseconds.
    pub ledger_initial_backoff_ms: u64,

    /// Ledger backoff cap, in milliseconds.
    pub ledger_max_backoff_ms: u64,

    /// Idle time after which an open call is settled by the sweeper.
    pub stale_call_after_seconds: u64,

    /// Sweeper period.
    pub sweep_interval_seconds: u64,

    /// Receiver for low-balance alerts; alerts are only logged without one.
    pub low_balance_webhook_url: Option<String>,

    /// Smallest top-up (default: 5.00).
    pub min_topup: Decimal,

    /// Largest top-up (default: 1000.00).
    pub max_topup: Decimal,

    /// Install the default price list when the rate table is empty.
    pub seed_default_rates: bool,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Payment secrets file structure.
#[derive(Debug, Deserialize)]
struct PaymentSecrets {
    webhook_secret: String,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            storage_backend: env_parse("STORAGE_BACKEND").unwrap_or(defaults.storage_backend),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            payment_webhook_secret: load_payment_webhook_secret(),
            webhook_tolerance_seconds: env_parse("WEBHOOK_TOLERANCE_SECONDS")
                .unwrap_or(defaults.webhook_tolerance_seconds),
            platform_fee_percentage: env_parse("PLATFORM_FEE_PERCENTAGE")
                .unwrap_or(defaults.platform_fee_percentage),
            pricing_mode: env_parse("PRICING_MODE").unwrap_or(defaults.pricing_mode),
            ledger_lock_timeout_ms: env_parse("LEDGER_LOCK_TIMEOUT_MS")
                .unwrap_or(defaults.ledger_lock_timeout_ms),
            ledger_max_retries: env_parse("LEDGER_MAX_RETRIES")
                .unwrap_or(defaults.ledger_max_retries),
            ledger_initial_backoff_ms: env_parse("LEDGER_INITIAL_BACKOFF_MS")
                .unwrap_or(defaults.ledger_initial_backoff_ms),
            ledger_max_backoff_ms: env_parse("LEDGER_MAX_BACKOFF_MS")
                .unwrap_or(defaults.ledger_max_backoff_ms),
            stale_call_after_seconds: env_parse("STALE_CALL_AFTER_SECONDS")
                .unwrap_or(defaults.stale_call_after_seconds),
            sweep_interval_seconds: env_parse("SWEEP_INTERVAL_SECONDS")
                .unwrap_or(defaults.sweep_interval_seconds),
            low_balance_webhook_url: std::env::var("LOW_BALANCE_WEBHOOK_URL").ok(),
            min_topup: env_parse("MIN_TOPUP").unwrap_or(defaults.min_topup),
            max_topup: env_parse("MAX_TOPUP").unwrap_or(defaults.max_topup),
            seed_default_rates: env_parse("SEED_DEFAULT_RATES")
                .unwrap_or(defaults.seed_default_rates),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
        }
    }

    /// Ledger lock and retry settings.
    #[must_use]
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            lock_timeout: Duration::from_millis(self.ledger_lock_timeout_ms),
            max_retries: self.ledger_max_retries,
            initial_backoff: Duration::from_millis(self.ledger_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.ledger_max_backoff_ms),
        }
    }

    /// Settlement settings.
    #[must_use]
    pub fn settlement_config(&self) -> SettlementConfig {
        SettlementConfig {
            pricing_mode: self.pricing_mode,
            platform_fee_percentage: self.platform_fee_percentage,
        }
    }

    /// Top-up bounds.
    #[must_use]
    pub fn topup_limits(&self) -> TopupLimits {
        TopupLimits {
            min: self.min_topup,
            max: self.max_topup,
        }
    }
}

/// Parse an environment variable, ignoring it when unset or malformed.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(key = %key, value = %raw, "Ignoring malformed configuration value");
    }
    parsed
}

/// Load the payment webhook secret from file or environment.
fn load_payment_webhook_secret() -> Option<String> {
    let secret_paths = [
        ".secrets/payments.json",
        "callmeter/.secrets/payments.json",
        "../.secrets/payments.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<PaymentSecrets>(path) {
            tracing::info!(path = %path, "Loaded payment secrets from file");
            return Some(secrets.webhook_secret);
        }
    }

    tracing::debug!("Payment secrets file not found, using environment variables");
    std::env::var("PAYMENT_WEBHOOK_SECRET").ok()
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/callmeter".into(),
            storage_backend: StorageBackend::Memory,
            service_api_key: None,
            admin_api_key: None,
            auth_jwt_secret: None,
            auth_audience: "callmeter".into(),
            payment_webhook_secret: None,
            webhook_tolerance_seconds: 300,
            platform_fee_percentage: DEFAULT_PLATFORM_FEE_PERCENTAGE,
            pricing_mode: PricingMode::CallStart,
            ledger_lock_timeout_ms: 2000,
            ledger_max_retries: 3,
            ledger_initial_backoff_ms: 50,
            ledger_max_backoff_ms: 2000,
            stale_call_after_seconds: 900,
            sweep_interval_seconds: 60,
            low_balance_webhook_url: None,
            min_topup: Decimal::new(500, 2),
            max_topup: Decimal::new(100_000, 2),
            seed_default_rates: false,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
