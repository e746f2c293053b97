//! Configuration loader for the `tankflow` backend service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.

use std::env;

use anyhow::{anyhow, Result};

/// Parse an optional environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Thresholds used by the alert engine when evaluating incoming readings.
///
/// Battery comparisons are strict (`<`), fuel comparisons are inclusive
/// (`<=`). Critical always wins over warning when both match.
#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    // ---
    /// Battery voltage below which a warning alert fires.
    pub battery_warning_volts: f64,

    /// Battery voltage below which a critical alert fires.
    pub battery_critical_volts: f64,

    /// Days of fuel remaining at or below which a warning alert fires.
    pub fuel_days_warning: f64,

    /// Days of fuel remaining at or below which a critical alert fires.
    pub fuel_days_critical: f64,

    /// Fill percentage at or below which a warning alert fires.
    pub fuel_percent_warning: f64,

    /// Fill percentage at or below which a critical alert fires.
    pub fuel_percent_critical: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            battery_warning_volts: 3.3,
            battery_critical_volts: 3.2,
            fuel_days_warning: 7.0,
            fuel_days_critical: 3.0,
            fuel_percent_warning: 15.0,
            fuel_percent_critical: 10.0,
        }
    }
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// TCP port the HTTP server listens on.
    pub http_port: u16,

    /// Shared secret expected in the webhook `Authorization` header.
    pub webhook_secret: String,

    /// Alert engine thresholds.
    pub thresholds: AlertThresholds,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
/// - `WEBHOOK_SECRET` – bearer token expected on webhook requests
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `HTTP_PORT` – HTTP listen port (default: 8080)
/// - `BATTERY_WARNING_VOLTS` – battery warning threshold (default: 3.3)
/// - `BATTERY_CRITICAL_VOLTS` – battery critical threshold (default: 3.2)
/// - `FUEL_DAYS_WARNING` – days-remaining warning threshold (default: 7)
/// - `FUEL_DAYS_CRITICAL` – days-remaining critical threshold (default: 3)
/// - `FUEL_PERCENT_WARNING` – fill-percent warning threshold (default: 15)
/// - `FUEL_PERCENT_CRITICAL` – fill-percent critical threshold (default: 10)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let webhook_secret = require_env!("WEBHOOK_SECRET");
    let db_pool_max = parse_env!("DB_POOL_MAX", u32, 5);
    let http_port = parse_env!("HTTP_PORT", u16, 8080);

    let thresholds = AlertThresholds {
        battery_warning_volts: parse_env!("BATTERY_WARNING_VOLTS", f64, 3.3),
        battery_critical_volts: parse_env!("BATTERY_CRITICAL_VOLTS", f64, 3.2),
        fuel_days_warning: parse_env!("FUEL_DAYS_WARNING", f64, 7.0),
        fuel_days_critical: parse_env!("FUEL_DAYS_CRITICAL", f64, 3.0),
        fuel_percent_warning: parse_env!("FUEL_PERCENT_WARNING", f64, 15.0),
        fuel_percent_critical: parse_env!("FUEL_PERCENT_CRITICAL", f64, 10.0),
    };

    Ok(Config {
        db_url,
        db_pool_max,
        http_port,
        webhook_secret,
        thresholds,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords and the webhook
    /// secret while showing all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        // Mask the password in the database URL for security
        let masked_db_url = if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                format!(
                    "{}:****{}",
                    &self.db_url[..colon_pos],
                    &self.db_url[at_pos..]
                )
            } else {
                self.db_url.clone()
            }
        } else {
            self.db_url.clone()
        };

        let t = &self.thresholds;

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL           : {}", masked_db_url);
        tracing::info!("  DB_POOL_MAX            : {}", self.db_pool_max);
        tracing::info!("  HTTP_PORT              : {}", self.http_port);
        tracing::info!("  WEBHOOK_SECRET         : ****");
        tracing::info!("  BATTERY_WARNING_VOLTS  : {}", t.battery_warning_volts);
        tracing::info!("  BATTERY_CRITICAL_VOLTS : {}", t.battery_critical_volts);
        tracing::info!("  FUEL_DAYS_WARNING      : {}", t.fuel_days_warning);
        tracing::info!("  FUEL_DAYS_CRITICAL     : {}", t.fuel_days_critical);
        tracing::info!("  FUEL_PERCENT_WARNING   : {}", t.fuel_percent_warning);
        tracing::info!("  FUEL_PERCENT_CRITICAL  : {}", t.fuel_percent_critical);
    }
}
