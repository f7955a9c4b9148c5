use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::rate_limiter::MIN_SAFE_INTERVAL;
use crate::services::category_rules::CategoryRules;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_BILLBEE_BASE_URL: &str = "https://api.billbee.io/api/v1";
/// The marketplace rejects some requests at exactly its documented maximum of 250.
const MAX_PAGE_SIZE: u32 = 249;

/// Marketplace API credentials and client tuning
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BillbeeConfig {
    #[serde(default = "default_billbee_base_url")]
    pub base_url: String,

    /// Basic-auth login
    #[serde(default)]
    pub username: String,

    /// Basic-auth password (the per-user API password, not the web login)
    #[serde(default)]
    pub api_password: String,

    /// Value of the `X-Billbee-Api-Key` header
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, max = 249))]
    pub page_size: u32,

    /// Attempts per request when the API answers 429
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    /// Wait applied when a 429 carries no `Retry-After`
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BillbeeConfig {
    fn default() -> Self {
        Self {
            base_url: default_billbee_base_url(),
            username: String::new(),
            api_password: String::new(),
            api_key: String::new(),
            page_size: default_page_size(),
            max_attempts: default_max_attempts(),
            default_retry_after_secs: default_retry_after_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BillbeeConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.trim().is_empty()
            && !self.api_password.trim().is_empty()
            && !self.api_key.trim().is_empty()
    }
}

/// Pipeline pacing, batch sizes and time budgets
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Minimum spacing between any two reserved-amount requests, across all lanes
    #[serde(default = "default_reserved_min_interval_ms")]
    pub reserved_min_interval_ms: u64,

    /// Number of lanes inside one worker batch; they share one pacing gate
    #[serde(default = "default_worker_concurrency")]
    #[validate(range(min = 1, max = 4))]
    pub worker_concurrency: usize,

    /// Batch size used when a worker invocation does not pass `limit`
    #[serde(default = "default_batch_limit")]
    #[validate(range(min = 1, max = 1000))]
    pub default_batch_limit: u64,

    /// Wall-clock budget of one orchestrator invocation
    #[serde(default = "default_orchestrator_budget_secs")]
    pub orchestrator_budget_secs: u64,

    #[serde(default = "default_batch_limit")]
    #[validate(range(min = 1, max = 1000))]
    pub orchestrator_batch_limit: u64,

    /// How long an orchestrator lease stays valid if never released
    #[serde(default = "default_orchestrator_lease_secs")]
    pub orchestrator_lease_secs: u64,

    /// Delay before an errored outbox row becomes eligible again
    #[serde(default = "default_outbox_backoff_secs")]
    pub outbox_backoff_secs: u64,

    #[serde(default = "default_outbox_sweep_limit")]
    #[validate(range(min = 1, max = 1000))]
    pub outbox_sweep_limit: u64,

    /// A `processing` outbox row untouched for this long belongs to a dead
    /// invocation and may be claimed again by a sweep
    #[serde(default = "default_outbox_processing_timeout_secs")]
    pub outbox_processing_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reserved_min_interval_ms: default_reserved_min_interval_ms(),
            worker_concurrency: default_worker_concurrency(),
            default_batch_limit: default_batch_limit(),
            orchestrator_budget_secs: default_orchestrator_budget_secs(),
            orchestrator_batch_limit: default_batch_limit(),
            orchestrator_lease_secs: default_orchestrator_lease_secs(),
            outbox_backoff_secs: default_outbox_backoff_secs(),
            outbox_sweep_limit: default_outbox_sweep_limit(),
            outbox_processing_timeout_secs: default_outbox_processing_timeout_secs(),
        }
    }
}

impl SyncConfig {
    pub fn reserved_min_interval(&self) -> Duration {
        Duration::from_millis(self.reserved_min_interval_ms)
    }

    pub fn orchestrator_budget(&self) -> Duration {
        Duration::from_secs(self.orchestrator_budget_secs)
    }

    pub fn orchestrator_lease(&self) -> Duration {
        Duration::from_secs(self.orchestrator_lease_secs)
    }

    pub fn outbox_backoff(&self) -> Duration {
        Duration::from_secs(self.outbox_backoff_secs)
    }

    pub fn outbox_processing_timeout(&self) -> Duration {
        Duration::from_secs(self.outbox_processing_timeout_secs)
    }
}

/// Comma-separated category lists; empty values fall back to the built-in rules
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryConfig {
    #[serde(default)]
    pub allow: Option<String>,
    #[serde(default)]
    pub ignore: Option<String>,
    #[serde(default)]
    pub excluded: Option<String>,
}

impl CategoryConfig {
    pub fn rules(&self) -> CategoryRules {
        let defaults = CategoryRules::default();
        CategoryRules::new(
            parse_list(self.allow.as_deref()).unwrap_or(defaults.allow),
            parse_list(self.ignore.as_deref()).unwrap_or(defaults.ignore),
            parse_list(self.excluded.as_deref()).unwrap_or(defaults.excluded),
        )
    }
}

fn parse_list(raw: Option<&str>) -> Option<Vec<String>> {
    let items: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
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

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
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

    #[serde(default)]
    #[validate]
    pub billbee: BillbeeConfig,

    #[serde(default)]
    #[validate]
    pub sync: SyncConfig,

    #[serde(default)]
    pub categories: CategoryConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the basics
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            billbee: BillbeeConfig::default(),
            sync: SyncConfig::default(),
            categories: CategoryConfig::default(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in test environment
    pub fn is_test(&self) -> bool {
        self.environment.eq_ignore_ascii_case("test")
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_test() && self.sync.reserved_min_interval() < MIN_SAFE_INTERVAL {
            let mut err = ValidationError::new("reserved_min_interval_ms");
            err.message = Some(
                format!(
                    "reserved_min_interval_ms must be at least {}ms outside tests",
                    MIN_SAFE_INTERVAL.as_millis()
                )
                .into(),
            );
            errors.add("sync", err);
        }

        if self.sync.outbox_processing_timeout_secs <= self.sync.orchestrator_budget_secs {
            let mut err = ValidationError::new("outbox_processing_timeout_secs");
            err.message = Some(
                "outbox_processing_timeout_secs must exceed orchestrator_budget_secs so live deliveries are never reclaimed"
                    .into(),
            );
            errors.add("sync", err);
        }

        if self.is_production() && !self.billbee.has_credentials() {
            let mut err = ValidationError::new("billbee_credentials_required");
            err.message = Some(
                "Set APP__BILLBEE__USERNAME, APP__BILLBEE__API_PASSWORD and APP__BILLBEE__API_KEY"
                    .into(),
            );
            errors.add("billbee", err);
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

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
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
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_billbee_base_url() -> String {
    DEFAULT_BILLBEE_BASE_URL.to_string()
}
fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}
fn default_max_attempts() -> u32 {
    5
}
fn default_retry_after_secs() -> u64 {
    1
}
fn default_request_timeout_secs() -> u64 {
    30
}

fn default_reserved_min_interval_ms() -> u64 {
    600
}
fn default_worker_concurrency() -> usize {
    2
}
fn default_batch_limit() -> u64 {
    50
}
fn default_orchestrator_budget_secs() -> u64 {
    110 // stays under the 120s gateway timeout of the function host
}
fn default_orchestrator_lease_secs() -> u64 {
    150
}
fn default_outbox_backoff_secs() -> u64 {
    300
}
fn default_outbox_sweep_limit() -> u64 {
    200
}
fn default_outbox_processing_timeout_secs() -> u64 {
    600
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

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("inventory_sync={},tower_http=info", level);
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
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://inventory_sync.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
