use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use validator::{Validate, ValidationError};

/// Application configuration, layered from `config/default.toml`, an optional
/// `config/{run_mode}.toml`, and `APP__`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    #[validate(custom = "validate_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_secs: i64,

    /// Secret API key for the payment gateway (Stripe-compatible REST API).
    pub stripe_secret_key: String,
    /// Webhook signing secret; webhook signature checks are skipped when unset.
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: u64,

    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_tax_rate")]
    pub tax_rate: Decimal,
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: Decimal,
    #[serde(default = "default_shipping_fee")]
    pub shipping_fee: Decimal,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_jwt_expiration() -> i64 {
    // 7 days, matching the session length of the storefront client
    7 * 24 * 3600
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com/v1".to_string()
}

fn default_webhook_tolerance() -> u64 {
    300
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_tax_rate() -> Decimal {
    Decimal::new(8, 2) // 8%
}

fn default_free_shipping_threshold() -> Decimal {
    Decimal::from(100)
}

fn default_shipping_fee() -> Decimal {
    Decimal::from(10)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    if secret.len() < 32 {
        return Err(ValidationError::new("jwt_secret_too_short"));
    }
    let weak = ["secret", "changeme", "password", "jwt_secret"];
    if weak.iter().any(|w| secret.eq_ignore_ascii_case(w)) {
        return Err(ValidationError::new("jwt_secret_weak"));
    }
    Ok(())
}

impl AppConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Loads configuration for the current run mode (`RUN_MODE`, default `development`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    let config: AppConfig = Config::builder()
        .add_source(File::with_name("config/default"))
        .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    Ok(config)
}

/// Installs the global tracing subscriber. JSON output is used when
/// `log_json` is set, plain compact output otherwise.
pub fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    }
}
