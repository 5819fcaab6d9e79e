use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_TAX_RATE: &str = "0.10";
const DEFAULT_SHIPPING_COST: &str = "5.00";
const DEFAULT_GATEWAY_URL: &str = "https://api.paystack.co";
const DEV_DEFAULT_JWT_SECRET: &str =
    "bazaar_development_only_secret_replace_me_before_deploying_anywhere_real_0123456789";

/// Pricing and reference policy applied when orders are built.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CommerceSettings {
    /// Tax rate as a fraction of the subtotal (0.10 = 10%)
    #[serde(default = "default_tax_rate")]
    #[validate(custom = "validate_tax_rate")]
    pub tax_rate: Decimal,

    /// Flat shipping cost used when no shipping method is chosen
    #[serde(default = "default_shipping_cost")]
    #[validate(custom = "validate_shipping_cost")]
    pub shipping_cost: Decimal,

    /// ISO currency code reported to the gateway and stored on payments
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    #[serde(default = "default_order_prefix")]
    #[validate(length(min = 1, max = 8))]
    pub order_number_prefix: String,

    #[serde(default = "default_payment_prefix")]
    #[validate(length(min = 1, max = 8))]
    pub payment_reference_prefix: String,
}

impl Default for CommerceSettings {
    fn default() -> Self {
        Self {
            tax_rate: default_tax_rate(),
            shipping_cost: default_shipping_cost(),
            currency: default_currency(),
            order_number_prefix: default_order_prefix(),
            payment_reference_prefix: default_payment_prefix(),
        }
    }
}

/// External payment gateway connection settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewaySettings {
    #[serde(default = "default_gateway_url")]
    #[validate(custom = "validate_http_url")]
    pub base_url: String,

    /// Bearer secret key sent with every gateway request
    #[serde(default)]
    pub secret_key: String,

    /// Where the gateway redirects the customer after checkout
    #[serde(default)]
    pub callback_url: Option<String>,

    /// Per-request HTTP timeout
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,

    /// Attempts made by `verify` before giving up on transient failures
    #[serde(default = "default_gateway_max_retries")]
    #[validate(range(min = 1, max = 10))]
    pub max_retries: u32,

    /// First backoff delay; doubled after each failed attempt
    #[serde(default = "default_gateway_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on a whole verification, retries included
    #[serde(default = "default_gateway_verify_deadline_secs")]
    #[validate(range(min = 1, max = 300))]
    pub verify_deadline_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            secret_key: String::new(),
            callback_url: None,
            timeout_secs: default_gateway_timeout_secs(),
            max_retries: default_gateway_max_retries(),
            backoff_base_ms: default_gateway_backoff_base_ms(),
            verify_deadline_secs: default_gateway_verify_deadline_secs(),
        }
    }
}

impl GatewaySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn verify_deadline(&self) -> Duration {
        Duration::from_secs(self.verify_deadline_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// HS256 secret used to validate bearer tokens
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Shared secret for provider webhook signatures
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Bound of the in-process event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Whole-request timeout applied by the HTTP stack
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub commerce: CommerceSettings,

    #[serde(default)]
    #[validate]
    pub gateway: GatewaySettings,
}

impl AppConfig {
    /// Builds a configuration without touching files or the environment.
    pub fn for_tests(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            jwt_secret: DEV_DEFAULT_JWT_SECRET.to_string(),
            webhook_secret: None,
            cors_allowed_origins: None,
            cors_allow_any_origin: true,
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
            commerce: CommerceSettings::default(),
            gateway: GatewaySettings::default(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "development" | "dev" | "local" | "test"
        )
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.cors_allow_any_origin || self.is_development()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if !self.is_development() && self.gateway.secret_key.trim().is_empty() {
            let mut err = ValidationError::new("gateway_secret_missing");
            err.message = Some("Set APP__GATEWAY__SECRET_KEY outside development".into());
            errors.add("gateway", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
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

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_tax_rate() -> Decimal {
    Decimal::from_str(DEFAULT_TAX_RATE).unwrap_or(Decimal::ZERO)
}

fn default_shipping_cost() -> Decimal {
    Decimal::from_str(DEFAULT_SHIPPING_COST).unwrap_or(Decimal::ZERO)
}

fn default_currency() -> String {
    "NGN".to_string()
}

fn default_order_prefix() -> String {
    "ORD".to_string()
}

fn default_payment_prefix() -> String {
    "PAY".to_string()
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_gateway_max_retries() -> u32 {
    3
}

fn default_gateway_backoff_base_ms() -> u64 {
    250
}

fn default_gateway_verify_deadline_secs() -> u64 {
    30
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

fn validate_tax_rate(rate: &Decimal) -> Result<(), ValidationError> {
    if rate.is_sign_negative() || *rate > Decimal::ONE {
        let mut err = ValidationError::new("tax_rate");
        err.message = Some("tax_rate must be between 0 and 1".into());
        return Err(err);
    }
    Ok(())
}

fn validate_shipping_cost(cost: &Decimal) -> Result<(), ValidationError> {
    if cost.is_sign_negative() {
        let mut err = ValidationError::new("shipping_cost");
        err.message = Some("shipping_cost cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

fn validate_http_url(url: &str) -> Result<(), ValidationError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        let mut err = ValidationError::new("base_url");
        err.message = Some("gateway base_url must be an http(s) URL".into());
        Err(err)
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("bazaar_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://bazaar.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
