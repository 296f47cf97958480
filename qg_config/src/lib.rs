//! ABOUTME: Configuration management with validation and environment loading
//! ABOUTME: Handles metrics namespace, hook scope, poll interval, and database settings

use config::{Config as ConfigBuilder, Environment, File};
use qg_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Default metric name prefix
pub const DEFAULT_NAMESPACE: &str = "querygauge";
/// Default hook name prefix
pub const DEFAULT_CALLBACK_SCOPE: &str = "querygauge";
/// Default interval between connection pool samples
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

/// Main configuration struct
#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub metrics: MetricsConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
}

/// Instrumentation settings
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prefix for every exported metric name
    #[validate(custom(function = "validate_metric_prefix"))]
    pub namespace: String,
    /// Prefix for every registered hook name
    #[validate(length(min = 1))]
    pub callback_scope: String,
    /// Interval between connection pool samples in milliseconds
    #[validate(range(min = 10, max = 3600000))]
    pub poll_interval_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            callback_scope: DEFAULT_CALLBACK_SCOPE.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl MetricsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub url: String,
    /// Logical database name, exported as the `database` label
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 1, max = 100))]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            name: "main".to_string(),
            pool_size: 5,
        }
    }
}

/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn validate_metric_prefix(prefix: &str) -> std::result::Result<(), ValidationError> {
    let mut chars = prefix.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_' || c == ':')
        .unwrap_or(false);

    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':') {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_metric_prefix"))
    }
}

impl Config {
    /// Load configuration from environment variables and optional .env file
    pub fn load() -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        // Set defaults first
        builder = builder
            .set_default("metrics.namespace", DEFAULT_NAMESPACE)?
            .set_default("metrics.callback_scope", DEFAULT_CALLBACK_SCOPE)?
            .set_default("metrics.poll_interval_ms", DEFAULT_POLL_INTERVAL_MS)?
            .set_default("database.url", "sqlite::memory:")?
            .set_default("database.name", "main")?
            .set_default("database.pool_size", 5)?;

        // Field names containing underscores don't survive the "_" separator,
        // so map them explicitly
        if let Ok(scope) = std::env::var("QUERYGAUGE_METRICS_CALLBACK_SCOPE") {
            builder = builder.set_override("metrics.callback_scope", scope)?;
        }

        if let Ok(interval) = std::env::var("QUERYGAUGE_METRICS_POLL_INTERVAL_MS") {
            builder = builder.set_override("metrics.poll_interval_ms", interval)?;
        }

        if let Ok(pool_size) = std::env::var("QUERYGAUGE_DATABASE_POOL_SIZE") {
            builder = builder.set_override("database.pool_size", pool_size)?;
        }

        // Try to load from .env file if it exists (optional)
        if std::path::Path::new(".env").exists() {
            builder = builder.add_source(File::with_name(".env").required(false));
        }

        // Load from environment variables with QUERYGAUGE_ prefix (highest priority)
        builder = builder.add_source(
            Environment::with_prefix("QUERYGAUGE")
                .try_parsing(true)
                .separator("_"),
        );

        let config = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build config: {}", e)))?;

        let parsed: Config = config
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to deserialize config: {}", e)))?;

        parsed
            .validate()
            .map_err(|e| Error::Config(format!("Config validation failed: {}", e)))?;

        Ok(parsed)
    }
}
