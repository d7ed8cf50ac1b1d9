//! # Configuration Management
//!
//! Centralized configuration for a cluster node's network stack.
//!
//! This module provides structured configuration for a network service, the
//! sessions it carries, cross-process actor calls, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides (`CLUSTER_NET_*`)
//!
//! ## Defaults
//! - Flush tick of 1 ms, 8 KiB ring buffer chunks, accept backlog of 1000
//! - Idle sessions are dropped after 60 s without traffic (when enabled)
//! - Actor calls time out after 40 s, swept once per second

use crate::core::packet::ServiceKind;
use crate::core::ring_buffer::DEFAULT_CHUNK_SIZE;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default listen backlog
pub const DEFAULT_BACKLOG: u32 = 1000;

/// Largest process id that fits the actor id's process field
pub const MAX_PROCESS_ID: u32 = (1 << 18) - 1;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Socket service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Cross-process actor messaging configuration
    #[serde(default)]
    pub actor: ActorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("CLUSTER_NET_ADDRESS") {
            config.service.address = addr;
        }

        if let Ok(kind) = std::env::var("CLUSTER_NET_KIND") {
            config.service.kind = match kind.to_ascii_lowercase().as_str() {
                "inner" => ServiceKind::Inner,
                "outer" => ServiceKind::Outer,
                other => {
                    return Err(ProtocolError::ConfigError(format!(
                        "Invalid CLUSTER_NET_KIND: '{other}' (expected 'inner' or 'outer')"
                    )))
                }
            };
        }

        if let Ok(process) = std::env::var("CLUSTER_NET_PROCESS") {
            if let Ok(val) = process.parse::<u32>() {
                config.actor.process = val;
            }
        }

        if let Ok(timeout) = std::env::var("CLUSTER_NET_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.service.connect_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("CLUSTER_NET_RPC_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.actor.rpc_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(enabled) = std::env::var("CLUSTER_NET_IDLE_CHECK") {
            if let Ok(val) = enabled.parse::<bool>() {
                config.session.idle_check_enabled = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.service.validate());
        errors.extend(self.session.validate());
        errors.extend(self.actor.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Socket service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Wire variant: `inner` between processes, `outer` toward clients
    pub kind: ServiceKind,

    /// Listen address (e.g., "127.0.0.1:20001")
    pub address: String,

    /// Whether the service accepts connections or only dials out
    pub listen: bool,

    /// Pending-connection queue length handed to `listen(2)`
    pub backlog: u32,

    /// Ring buffer chunk size in bytes (power of two)
    pub chunk_size: usize,

    /// Interval of the flush tick that pushes buffered sends to sockets
    #[serde(with = "duration_serde")]
    pub update_interval: Duration,

    /// Timeout for outgoing connection attempts
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            kind: ServiceKind::Inner,
            address: String::from("127.0.0.1:20001"),
            listen: true,
            backlog: DEFAULT_BACKLOG,
            chunk_size: DEFAULT_CHUNK_SIZE,
            update_interval: Duration::from_millis(1),
            connect_timeout: timeout::DEFAULT_TIMEOUT,
        }
    }
}

impl ServiceConfig {
    /// Validate service configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Service address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid service address format: '{}' (expected format: '0.0.0.0:20001')",
                self.address
            ));
        }

        if self.backlog == 0 {
            errors.push("Backlog must be greater than 0".to_string());
        }

        if self.chunk_size == 0 || !self.chunk_size.is_power_of_two() {
            errors.push(format!(
                "Chunk size must be a power of two: {}",
                self.chunk_size
            ));
        } else if self.chunk_size < 64 {
            errors.push("Chunk size too small (minimum: 64 bytes)".to_string());
        } else if self.chunk_size > 1024 * 1024 {
            errors.push("Chunk size too large (maximum: 1 MiB)".to_string());
        }

        if self.update_interval.is_zero() {
            errors.push("Update interval must be greater than 0".to_string());
        } else if self.update_interval.as_millis() > 1000 {
            errors.push("Update interval too long (maximum: 1s)".to_string());
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether idle sessions are swept
    pub idle_check_enabled: bool,

    /// Interval between idle sweeps
    #[serde(with = "duration_serde")]
    pub idle_check_interval: Duration,

    /// Maximum time without receiving before a session is dropped
    #[serde(with = "duration_serde")]
    pub recv_max_idle: Duration,

    /// Maximum time without sending before a session is dropped
    #[serde(with = "duration_serde")]
    pub send_max_idle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_check_enabled: false,
            idle_check_interval: Duration::from_millis(2000),
            recv_max_idle: Duration::from_secs(60),
            send_max_idle: Duration::from_secs(60),
        }
    }
}

impl SessionConfig {
    /// Validate session configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.idle_check_enabled {
            if self.idle_check_interval.as_millis() < 100 {
                errors.push("Idle check interval too short (minimum: 100ms)".to_string());
            }

            if self.recv_max_idle < self.idle_check_interval {
                errors.push("recv_max_idle must not be shorter than idle_check_interval".to_string());
            }

            if self.send_max_idle < self.idle_check_interval {
                errors.push("send_max_idle must not be shorter than idle_check_interval".to_string());
            }
        }

        errors
    }
}

/// Cross-process actor messaging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Id of the local process, encoded into every actor id it owns
    pub process: u32,

    /// Timeout for outstanding actor calls
    #[serde(with = "duration_serde")]
    pub rpc_timeout: Duration,

    /// Interval between timeout sweeps
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            process: 1,
            rpc_timeout: timeout::RPC_TIMEOUT,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl ActorConfig {
    /// Validate actor configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.process > MAX_PROCESS_ID {
            errors.push(format!(
                "Process id too large: {} (maximum: {MAX_PROCESS_ID})",
                self.process
            ));
        }

        if self.rpc_timeout.as_millis() < 100 {
            errors.push("Rpc timeout too short (minimum: 100ms)".to_string());
        }

        if self.sweep_interval.as_millis() < 10 {
            errors.push("Sweep interval too short (minimum: 10ms)".to_string());
        } else if self.sweep_interval > self.rpc_timeout {
            errors.push("Sweep interval cannot be longer than rpc timeout".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("cluster-net"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
