use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use validator::{Validate, ValidationError};

/// Runtime configuration for the stock ledger.
///
/// Values are layered from `config/default`, an environment specific file
/// (`config/development`, `config/production`, ...) and finally `APP__*`
/// environment variables, so `APP__DATABASE_URL` always wins.
#[derive(Debug, Deserialize, Clone, Validate)]
pub struct AppConfig {
    /// Connection string for Postgres or SQLite.
    #[validate(length(min = 1, message = "database_url must not be empty"))]
    pub database_url: String,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of the human readable format.
    #[serde(default)]
    pub log_json: bool,

    /// Run pending migrations on startup.
    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1, max = 1024))]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// Buffer size of the in-process ledger event channel.
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1, max = 65536))]
    pub event_channel_capacity: usize,

    /// How many times a movement is retried after a transient database error.
    #[serde(default = "default_movement_retry_attempts")]
    #[validate(range(min = 1, max = 16))]
    pub movement_retry_attempts: u32,

    /// Base delay for the exponential backoff between movement retries.
    #[serde(default = "default_movement_retry_base_delay_ms")]
    pub movement_retry_base_delay_ms: u64,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_auto_migrate() -> bool {
    true
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

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_movement_retry_attempts() -> u32 {
    3
}

fn default_movement_retry_base_delay_ms() -> u64 {
    25
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("invalid_log_level")),
    }
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading error: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation error: {0}")]
    Validation(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Loads configuration from files and the environment.
///
/// `APP_ENV` selects the environment specific file. Both files are optional,
/// which keeps tests and the demo binary runnable with nothing but
/// `APP__DATABASE_URL` set.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let environment = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

    let builder = Config::builder()
        .set_default("environment", environment.clone())?
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{}", environment)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    let config = builder.build()?;
    let app_config: AppConfig = config.try_deserialize()?;

    app_config
        .validate()
        .map_err(|e| AppConfigError::Validation(e.to_string()))?;

    Ok(app_config)
}

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level when present.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stockledger={},sea_orm=warn", level)));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}
