//! Main application configuration
//!
//! This module defines the primary configuration structures for the duet-room
//! service, including environment variable and TOML file loading and validation.

use crate::config::matchmaking::{MatchmakingSettings, NextPolicy};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub matchmaking: MatchmakingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for the WebSocket gateway
    pub http_port: u16,
    /// Port for health check endpoint
    pub health_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "duet-room".to_string(),
            log_level: "info".to_string(),
            http_port: 3001,
            health_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

/// Parse an optional environment variable
fn env_value<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {} value: {}", name, raw)),
        Err(_) => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Some(port) = env_value("HTTP_PORT")? {
            config.service.http_port = port;
        }
        if let Some(port) = env_value("HEALTH_PORT")? {
            config.service.health_port = port;
        }
        if let Some(timeout) = env_value("SHUTDOWN_TIMEOUT_SECONDS")? {
            config.service.shutdown_timeout_seconds = timeout;
        }

        // Matchmaking settings
        if let Some(limit) = env_value("SCAN_LIMIT")? {
            config.matchmaking.scan_limit = limit;
        }
        if let Some(policy) = env_value::<NextPolicy>("NEXT_POLICY")? {
            config.matchmaking.next_policy = policy;
        }
        if let Some(requeue) = env_value("REQUEUE_PARTNER_ON_LEAVE")? {
            config.matchmaking.requeue_partner_on_leave = requeue;
        }
        if let Some(max_bytes) = env_value("MAX_MESSAGE_BYTES")? {
            config.matchmaking.max_message_bytes = max_bytes;
        }
        if let Some(interval) = env_value("METRICS_INTERVAL_SECONDS")? {
            config.matchmaking.metrics_interval_seconds = interval;
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get gauge refresh interval as Duration
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.matchmaking.metrics_interval_seconds)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports
    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }
    if config.service.health_port == 0 {
        return Err(anyhow!("Health port cannot be 0"));
    }
    if config.service.http_port == config.service.health_port {
        return Err(anyhow!(
            "HTTP and health ports must differ (both {})",
            config.service.http_port
        ));
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.matchmaking.metrics_interval_seconds == 0 {
        return Err(anyhow!("Metrics interval must be greater than 0"));
    }

    // Validate matchmaking settings
    if config.matchmaking.scan_limit == 0 {
        return Err(anyhow!("Scan limit must be greater than 0"));
    }
    if config.matchmaking.max_message_bytes < 1024 {
        return Err(anyhow!(
            "Max message size must be at least 1024 bytes, got {}",
            config.matchmaking.max_message_bytes
        ));
    }

    Ok(())
}
