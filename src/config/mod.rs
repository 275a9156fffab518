//! Configuration Module
//!
//! Provides TOML-based configuration for the adapter, with the recognized
//! options of spec §6:
//! - `connect_arrival_timeout` (optional): max time from channel active to CONNECT.
//! - `max_keep_alive_timeout` (optional): cap on derived keep-alive.
//! - `device_receive_ack_timeout` + `device_receive_ack_can_timeout`: per-processor ack timeout.
//! - `abort_on_out_of_order_puback`: fatal-vs-tolerant ack ordering policy.
//! - `max_pending_inbound_acknowledgements`: outbound processors' aggregate backlog bound.
//! - `service_property_prefix`: prefix for system-set message properties.
//! - Environment variable overrides (ADAPTER_* prefix).

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

#[cfg(test)]
mod tests;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Config(config::ConfigError),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "parse error: {}", e),
            ConfigError::Config(e) => write!(f, "config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Logging configuration, consumed by the embedder to set up `tracing`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Root adapter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub log: LogConfig,

    /// Max time from channel active to CONNECT. `None` disables the timer.
    #[serde(with = "humantime_serde::option", default)]
    pub connect_arrival_timeout: Option<Duration>,

    /// Cap on the derived keep-alive (`1.5 × client-requested`). `None`
    /// means no cap is applied beyond the protocol's own u16 range.
    #[serde(with = "humantime_serde::option", default)]
    pub max_keep_alive_timeout: Option<Duration>,

    /// How long an outbound request/ack processor waits for an ack before
    /// retransmitting.
    #[serde(
        with = "humantime_serde",
        default = "default_device_receive_ack_timeout"
    )]
    pub device_receive_ack_timeout: Duration,

    /// Whether `device_receive_ack_timeout` can expire at all; when false,
    /// pending records wait indefinitely (no retransmission).
    #[serde(default = "default_true")]
    pub device_receive_ack_can_timeout: bool,

    /// When set, an ack arriving out of send order is fatal for the
    /// connection; when unset, the processor's own tolerant policy applies.
    #[serde(default)]
    pub abort_on_out_of_order_puback: bool,

    /// Aggregate backlog bound across the three outbound processors, used
    /// to derive `ReadThrottled` (spec §4.9).
    #[serde(default = "default_max_pending_inbound_acks")]
    pub max_pending_inbound_acknowledgements: usize,

    /// Prefix applied to system-set message properties the adapter attaches
    /// to outbound messages (e.g. delivery metadata).
    #[serde(default = "default_service_property_prefix")]
    pub service_property_prefix: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            connect_arrival_timeout: None,
            max_keep_alive_timeout: None,
            device_receive_ack_timeout: default_device_receive_ack_timeout(),
            device_receive_ack_can_timeout: default_true(),
            abort_on_out_of_order_puback: false,
            max_pending_inbound_acknowledgements: default_max_pending_inbound_acks(),
            service_property_prefix: default_service_property_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_device_receive_ack_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_pending_inbound_acks() -> usize {
    16
}

fn default_service_property_prefix() -> String {
    "svc-".to_string()
}

impl AdapterConfig {
    /// Load configuration from a TOML file with environment variable
    /// overrides (`ADAPTER__FIELD_NAME` style, double underscore for
    /// nesting).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("device_receive_ack_timeout", "30s")?
            .set_default("device_receive_ack_can_timeout", true)?
            .set_default("abort_on_out_of_order_puback", false)?
            .set_default("max_pending_inbound_acknowledgements", 16_i64)?
            .set_default("service_property_prefix", "svc-")?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConfigError::Io(e)),
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("ADAPTER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AdapterConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a string (no file I/O, no env overrides).
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: AdapterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending_inbound_acknowledgements == 0 {
            return Err(ConfigError::Validation(
                "max_pending_inbound_acknowledgements must be at least 1".to_string(),
            ));
        }
        if self.service_property_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "service_property_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
