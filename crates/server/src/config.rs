//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use fulfillment::FulfillmentSettings;

use crate::scheduler::Schedule;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `RESERVATION_TTL_MINUTES`: hold taken at order creation (default: `15`)
/// - `PAYMENT_TTL_MINUTES`: payment lifetime (default: `15`)
/// - `SWEEP_INTERVAL_SECS`: reservation sweep period (default: `60`)
/// - `PAYMENT_EXPIRY_INTERVAL_SECS`: payment expiry period (default: `60`)
/// - `RECONCILE_INTERVAL_SECS`: reconciliation period (default: `300`)
/// - `VAULT_KEY`: base64 AES-256 key; unset uses an ephemeral key
/// - `CATALOG_PATH`: JSON file of products to load at start-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub reservation_ttl_minutes: i64,
    pub payment_ttl_minutes: i64,
    pub sweep_interval_secs: u64,
    pub payment_expiry_interval_secs: u64,
    pub reconcile_interval_secs: u64,
    pub vault_key: Option<String>,
    pub catalog_path: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`. Unparseable or non-positive
    /// values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: text("HOST").unwrap_or(defaults.host),
            port: parse_var::<u16>(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: text("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse_var::<LogFormat>(&lookup, "LOG_FORMAT")
                .unwrap_or(defaults.log_format),
            database_url: text("DATABASE_URL"),
            database_max_connections: parse_var::<u32>(&lookup, "DATABASE_MAX_CONNECTIONS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.database_max_connections),
            reservation_ttl_minutes: parse_var::<i64>(&lookup, "RESERVATION_TTL_MINUTES")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.reservation_ttl_minutes),
            payment_ttl_minutes: parse_var::<i64>(&lookup, "PAYMENT_TTL_MINUTES")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.payment_ttl_minutes),
            sweep_interval_secs: parse_var::<u64>(&lookup, "SWEEP_INTERVAL_SECS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.sweep_interval_secs),
            payment_expiry_interval_secs: parse_var::<u64>(&lookup, "PAYMENT_EXPIRY_INTERVAL_SECS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.payment_expiry_interval_secs),
            reconcile_interval_secs: parse_var::<u64>(&lookup, "RECONCILE_INTERVAL_SECS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.reconcile_interval_secs),
            vault_key: text("VAULT_KEY"),
            catalog_path: text("CATALOG_PATH"),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn fulfillment_settings(&self) -> FulfillmentSettings {
        FulfillmentSettings {
            reservation_ttl_minutes: self.reservation_ttl_minutes,
            payment_ttl_minutes: self.payment_ttl_minutes,
            ..FulfillmentSettings::default()
        }
    }

    pub fn schedule(&self) -> Schedule {
        Schedule {
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            payment_expiry_interval: Duration::from_secs(self.payment_expiry_interval_secs),
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 10,
            reservation_ttl_minutes: 15,
            payment_ttl_minutes: 15,
            sweep_interval_secs: 60,
            payment_expiry_interval_secs: 60,
            reconcile_interval_secs: 300,
            vault_key: None,
            catalog_path: None,
        }
    }
}
