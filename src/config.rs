//! Configuration loader for the `forecast-consensus` service.
//!
//! This module centralizes all runtime configuration values and their
//! defaults, loading from environment variables (with optional `.env` file
//! support provided by the caller). Per-parameter model settings are a
//! separate JSON document handled by [`crate::model_config`]; this module
//! only knows where to find it.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

/// Parse an optional numeric environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Read an optional, non-empty string environment variable.
macro_rules! optional_env {
    ($var_name:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
}

pub const DEFAULT_FORECAST_URL: &str = "https://api.open-meteo.com";
pub const DEFAULT_AIR_QUALITY_URL: &str = "https://air-quality-api.open-meteo.com";

/// Longest horizon the upstream forecast endpoint serves.
const MAX_FORECAST_DAYS: u32 = 16;

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    // ---
    /// Base URL of the multi-model forecast API.
    pub forecast_url: String,

    /// Base URL of the air-quality API (UV index, AQI).
    pub air_quality_url: String,

    /// Optional key for the commercial upstream tier.
    pub api_key: Option<String>,

    /// Days of hourly data requested upstream.
    pub forecast_days: u32,

    /// Timeout applied to each upstream request.
    pub fetch_timeout_secs: u32,

    pub raw_cache_ttl_secs: u32,
    pub processed_cache_ttl_secs: u32,

    /// Model configuration file; the compiled-in default is used when unset.
    pub model_config_path: Option<PathBuf>,

    pub listen_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forecast_url: DEFAULT_FORECAST_URL.to_string(),
            air_quality_url: DEFAULT_AIR_QUALITY_URL.to_string(),
            api_key: None,
            forecast_days: 7,
            fetch_timeout_secs: 10,
            raw_cache_ttl_secs: 900,
            processed_cache_ttl_secs: 900,
            model_config_path: None,
            listen_port: 8080,
        }
    }
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `UPSTREAM_FORECAST_URL` – forecast API base URL (default: Open-Meteo)
/// - `UPSTREAM_AIR_QUALITY_URL` – air-quality API base URL (default: Open-Meteo)
/// - `UPSTREAM_API_KEY` – API key sent as the `apikey` query parameter
/// - `FORECAST_DAYS` – forecast horizon in days, 1..=16 (default: 7)
/// - `FETCH_TIMEOUT_SECS` – upstream request timeout (default: 10)
/// - `CACHE_TTL_SECS` – TTL of both cache tiers (default: 900)
/// - `RAW_CACHE_TTL_SECS` / `PROCESSED_CACHE_TTL_SECS` – per-tier override
/// - `MODEL_CONFIG_PATH` – model configuration JSON file
/// - `LISTEN_PORT` – HTTP port (default: 8080)
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let defaults = Config::default();

    let forecast_url = optional_env!("UPSTREAM_FORECAST_URL").unwrap_or(defaults.forecast_url);
    let air_quality_url =
        optional_env!("UPSTREAM_AIR_QUALITY_URL").unwrap_or(defaults.air_quality_url);
    let api_key = optional_env!("UPSTREAM_API_KEY");
    let forecast_days = parse_env!("FORECAST_DAYS", u32, defaults.forecast_days);
    let fetch_timeout_secs = parse_env!("FETCH_TIMEOUT_SECS", u32, defaults.fetch_timeout_secs);
    let cache_ttl_secs = parse_env!("CACHE_TTL_SECS", u32, defaults.raw_cache_ttl_secs);
    let raw_cache_ttl_secs = parse_env!("RAW_CACHE_TTL_SECS", u32, cache_ttl_secs);
    let processed_cache_ttl_secs = parse_env!("PROCESSED_CACHE_TTL_SECS", u32, cache_ttl_secs);
    let model_config_path = optional_env!("MODEL_CONFIG_PATH").map(PathBuf::from);
    let listen_port = parse_env!("LISTEN_PORT", u16, defaults.listen_port);

    let config = Config {
        forecast_url: forecast_url.trim_end_matches('/').to_string(),
        air_quality_url: air_quality_url.trim_end_matches('/').to_string(),
        api_key,
        forecast_days,
        fetch_timeout_secs,
        raw_cache_ttl_secs,
        processed_cache_ttl_secs,
        model_config_path,
        listen_port,
    };
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        // ---
        if !(1..=MAX_FORECAST_DAYS).contains(&self.forecast_days) {
            bail!(
                "FORECAST_DAYS must be between 1 and {}, got {}",
                MAX_FORECAST_DAYS,
                self.forecast_days
            );
        }
        if self.fetch_timeout_secs == 0 {
            bail!("FETCH_TIMEOUT_SECS must be positive");
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.into())
    }

    pub fn raw_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.raw_cache_ttl_secs.into())
    }

    pub fn processed_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.processed_cache_ttl_secs.into())
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the API key while showing all other values that were loaded.
    pub fn log_config(&self) {
        // ---
        let masked_key = match &self.api_key {
            Some(key) => {
                let hidden = key.chars().count().saturating_sub(4).max(4);
                format!("****{}", key.chars().skip(hidden).collect::<String>())
            }
            None => "(none)".to_string(),
        };
        let model_config = self
            .model_config_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(built-in)".to_string());

        tracing::info!("Configuration loaded:");
        tracing::info!("  UPSTREAM_FORECAST_URL    : {}", self.forecast_url);
        tracing::info!("  UPSTREAM_AIR_QUALITY_URL : {}", self.air_quality_url);
        tracing::info!("  UPSTREAM_API_KEY         : {}", masked_key);
        tracing::info!("  FORECAST_DAYS            : {}", self.forecast_days);
        tracing::info!("  FETCH_TIMEOUT_SECS       : {}", self.fetch_timeout_secs);
        tracing::info!("  RAW_CACHE_TTL_SECS       : {}", self.raw_cache_ttl_secs);
        tracing::info!("  PROCESSED_CACHE_TTL_SECS : {}", self.processed_cache_ttl_secs);
        tracing::info!("  MODEL_CONFIG_PATH        : {}", model_config);
        tracing::info!("  LISTEN_PORT              : {}", self.listen_port);
    }
}
