//! Process configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use orchestrator::{OrchestratorConfig, RetryPolicy, SweeperConfig};

use crate::error::ConfigError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected text or json, got {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: Postgres connection string (unset: in-memory store)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `PENDING_ORDER_TIMEOUT_SECS`: payment window (default: `60`)
/// - `SWEEP_INTERVAL_SECS`: sweeper period (default: `60`)
/// - `PAYMENT_MAX_RETRIES`: retries after the first attempt (default: `3`)
/// - `PAYMENT_BACKOFF_BASE_MS`: backoff base (default: `1000`)
/// - `PAYMENT_BACKOFF_MAX_MS`: backoff cap (default: `30000`)
/// - `METRICS_ADDR`: Prometheus listener (default: `"0.0.0.0:9000"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub pending_order_timeout: Duration,
    pub sweep_interval: Duration,
    pub payment_max_retries: u32,
    pub payment_backoff_base: Duration,
    pub payment_backoff_max: Duration,
    pub metrics_addr: SocketAddr,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns the raw value of a
    /// variable if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let secs = |key: &'static str, default: Duration| {
            parse(&lookup, key, default.as_secs()).map(Duration::from_secs)
        };
        let millis = |key: &'static str, default: Duration| {
            parse(&lookup, key, default.as_millis() as u64).map(Duration::from_millis)
        };

        let config = Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: parse(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            pending_order_timeout: secs(
                "PENDING_ORDER_TIMEOUT_SECS",
                defaults.pending_order_timeout,
            )?,
            sweep_interval: secs("SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            payment_max_retries: parse(
                &lookup,
                "PAYMENT_MAX_RETRIES",
                defaults.payment_max_retries,
            )?,
            payment_backoff_base: millis("PAYMENT_BACKOFF_BASE_MS", defaults.payment_backoff_base)?,
            payment_backoff_max: millis("PAYMENT_BACKOFF_MAX_MS", defaults.payment_backoff_max)?,
            metrics_addr: parse(&lookup, "METRICS_ADDR", defaults.metrics_addr)?,
            log_format: parse(&lookup, "LOG_FORMAT", defaults.log_format)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "SWEEP_INTERVAL_SECS",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.database_max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "DATABASE_MAX_CONNECTIONS",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.payment_max_retries,
            self.payment_backoff_base,
            self.payment_backoff_max,
        )
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            retry: self.retry_policy(),
        }
    }

    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            interval: self.sweep_interval,
            timeout: self.pending_order_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let sweeper = SweeperConfig::default();
        Self {
            database_url: None,
            database_max_connections: 10,
            pending_order_timeout: sweeper.timeout,
            sweep_interval: sweeper.interval,
            payment_max_retries: retry.max_retries,
            payment_backoff_base: retry.base_delay,
            payment_backoff_max: retry.max_delay,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            log_format: LogFormat::Text,
        }
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
        }),
    }
}
