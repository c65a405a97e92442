use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_CACHE_TYPE: &str = "in-memory";
const DEFAULT_CART_TTL_SECS: u64 = 120;
const DEFAULT_OFFER_TTL_SECS: u64 = 300;
const DEFAULT_MAX_CART_QUANTITY: i32 = 10;
const DEFAULT_REFUND_WINDOW_DAYS: i64 = 14;
const DEFAULT_MAX_WEBHOOK_BODY_BYTES: usize = 65_536;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;

/// Cache configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Type of cache to use: "in-memory", "redis", or "disabled"
    #[serde(default = "default_cache_type")]
    #[validate(custom = "validate_cache_type")]
    pub cache_type: String,

    /// TTL of a cached cart listing
    #[serde(default = "default_cart_ttl_secs")]
    pub cart_ttl_secs: u64,

    /// TTL of a cached offer snapshot
    #[serde(default = "default_offer_ttl_secs")]
    pub offer_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: default_cache_type(),
            cart_ttl_secs: DEFAULT_CART_TTL_SECS,
            offer_ttl_secs: DEFAULT_OFFER_TTL_SECS,
        }
    }
}

impl CacheConfig {
    pub fn cart_ttl(&self) -> Duration {
        Duration::from_secs(self.cart_ttl_secs)
    }

    pub fn offer_ttl(&self) -> Duration {
        Duration::from_secs(self.offer_ttl_secs)
    }
}

/// Payment provider configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentConfig {
    /// Base URL of the hosted-checkout API
    #[serde(default = "default_payment_api_base_url")]
    #[validate(url)]
    pub api_base_url: String,

    /// API secret used for outbound calls
    #[serde(default)]
    pub secret_key: String,

    /// Shared secret used to sign inbound webhooks
    #[validate(length(min = 1))]
    pub webhook_secret: String,

    /// Maximum accepted age of a signed webhook timestamp
    #[serde(default = "default_webhook_tolerance_secs")]
    #[validate(range(min = 1))]
    pub webhook_tolerance_secs: u64,

    /// ISO currency code used for checkout sessions
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    #[serde(default = "default_success_url")]
    #[validate(url)]
    pub success_url: String,

    #[serde(default = "default_cancel_url")]
    #[validate(url)]
    pub cancel_url: String,

    /// Upper bound on a single gateway call
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub request_timeout_secs: u64,
}

impl PaymentConfig {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            api_base_url: default_payment_api_base_url(),
            secret_key: String::new(),
            webhook_secret: webhook_secret.into(),
            webhook_tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS,
            currency: default_currency(),
            success_url: default_success_url(),
            cancel_url: default_cancel_url(),
            request_timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn webhook_tolerance(&self) -> Duration {
        Duration::from_secs(self.webhook_tolerance_secs)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Redis connection URL, used when `cache.cache_type = "redis"`
    pub redis_url: String,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub cache: CacheConfig,

    #[validate]
    pub payment: PaymentConfig,

    /// Per-user, per-offer cart quantity cap
    #[serde(default = "default_max_cart_quantity")]
    #[validate(range(min = 1, max = 1000))]
    pub max_cart_quantity: i32,

    /// Days after delivery during which a refund may be requested
    #[serde(default = "default_refund_window_days")]
    #[validate(range(min = 1))]
    pub refund_window_days: i64,

    /// Largest webhook body accepted before verification
    #[serde(default = "default_max_webhook_body_bytes")]
    #[validate(range(min = 1024))]
    pub max_webhook_body_bytes: usize,
}

impl AppConfig {
    /// Builds a configuration with every optional setting at its default.
    pub fn new(database_url: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            redis_url: "redis://localhost:6379".to_string(),
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            cache: CacheConfig::default(),
            payment: PaymentConfig::new(webhook_secret),
            max_cart_quantity: DEFAULT_MAX_CART_QUANTITY,
            refund_window_days: DEFAULT_REFUND_WINDOW_DAYS,
            max_webhook_body_bytes: DEFAULT_MAX_WEBHOOK_BODY_BYTES,
        }
    }

    pub fn refund_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.refund_window_days)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_cache_type() -> String {
    DEFAULT_CACHE_TYPE.to_string()
}

fn default_cart_ttl_secs() -> u64 {
    DEFAULT_CART_TTL_SECS
}

fn default_offer_ttl_secs() -> u64 {
    DEFAULT_OFFER_TTL_SECS
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_payment_api_base_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_success_url() -> String {
    "https://localhost/payment-success".to_string()
}

fn default_cancel_url() -> String {
    "https://localhost/payment-cancel".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_max_cart_quantity() -> i32 {
    DEFAULT_MAX_CART_QUANTITY
}

fn default_refund_window_days() -> i64 {
    DEFAULT_REFUND_WINDOW_DAYS
}

fn default_max_webhook_body_bytes() -> usize {
    DEFAULT_MAX_WEBHOOK_BODY_BYTES
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_cache_type(value: &str) -> Result<(), ValidationError> {
    match value {
        "in-memory" | "redis" | "disabled" => Ok(()),
        _ => {
            let mut err = ValidationError::new("cache_type");
            err.message = Some("Must be one of: in-memory, redis, disabled".into());
            Err(err)
        }
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("marketplace_orders={},sea_orm=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration from `./config`.
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] but reads the TOML layers from `dir`.
pub fn load_config_from(dir: &Path) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            dir.display()
        );
    }

    // payment.webhook_secret has no default; it must come from a file or APP__PAYMENT__WEBHOOK_SECRET.
    let config = Config::builder()
        .set_default("database_url", "sqlite://marketplace.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&dir.join("default").to_string_lossy()).required(false))
        .add_source(File::with_name(&dir.join(&run_env).to_string_lossy()).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("payment.webhook_secret").is_err() {
        error!("Webhook signing secret is not configured. Set APP__PAYMENT__WEBHOOK_SECRET.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "payment.webhook_secret is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
