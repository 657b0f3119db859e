//! Loads a [`CoordinationConfig`] from layered sources.

use crate::services::config::CoordinationConfig;
use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid max_retries: {0}, must be at least 1")]
    InvalidMaxRetries(u32),

    #[error("invalid retry_delay_ms: {0}, must be positive")]
    InvalidRetryDelay(u64),

    #[error("invalid resource_timeout_ms: {0}, must be positive")]
    InvalidResourceTimeout(u64),

    #[error("invalid message_timeout_ms: {0}, must be positive")]
    InvalidMessageTimeout(u64),

    #[error("invalid maintenance_interval_ms: {0}, must be positive")]
    InvalidMaintenanceInterval(u64),

    #[error("invalid circuit_breaker.half_open_limit: {0}, must be at least 1")]
    InvalidHalfOpenLimit(usize),

    #[error("invalid log level: {0}, must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

/// Loads configuration with hierarchical merging across defaults, file,
/// and environment layers.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.coord/config.yaml` (project config)
    /// 3. `.coord/local.yaml` (project local overrides, optional)
    /// 4. Environment variables (`COORD_*` prefix, highest priority)
    pub fn load() -> Result<CoordinationConfig> {
        let config: CoordinationConfig = Figment::new()
            .merge(Serialized::defaults(CoordinationConfig::default()))
            .merge(Yaml::file(".coord/config.yaml"))
            .merge(Yaml::file(".coord/local.yaml"))
            .merge(Env::prefixed("COORD_").split("__"))
            .extract()
            .context("failed to extract coordination config from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<CoordinationConfig> {
        let config: CoordinationConfig = Figment::new()
            .merge(Serialized::defaults(CoordinationConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &CoordinationConfig) -> Result<(), ConfigError> {
        if config.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.max_retries));
        }
        if config.retry_delay_ms == 0 {
            return Err(ConfigError::InvalidRetryDelay(config.retry_delay_ms));
        }
        if config.resource_timeout_ms == 0 {
            return Err(ConfigError::InvalidResourceTimeout(
                config.resource_timeout_ms,
            ));
        }
        if config.message_timeout_ms == 0 {
            return Err(ConfigError::InvalidMessageTimeout(config.message_timeout_ms));
        }
        if config.maintenance_interval_ms == 0 {
            return Err(ConfigError::InvalidMaintenanceInterval(
                config.maintenance_interval_ms,
            ));
        }
        if config.circuit_breaker.half_open_limit == 0 {
            return Err(ConfigError::InvalidHalfOpenLimit(
                config.circuit_breaker.half_open_limit,
            ));
        }
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }
}
