//! # Configuration Management
//!
//! Centralized configuration for the game session protocol.
//!
//! Server and client settings cover ports, bind addresses, timeout policy, and
//! disconnect redundancy. Logging settings feed
//! [`init_logging`](crate::utils::logging::init_logging).
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - `GAMELINK_*` environment overrides via `from_env()`
//!
//! Durations are written in milliseconds.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Well-known UDP port the server listens on
pub const SERVER_PORT: u16 = 8755;

/// Connection slots on the server, including the reserved local slot 0
pub const MAX_CLIENTS: usize = 4;

/// Redundant copies of every Disconnect sent
pub const DISCONNECT_REDUNDANCY: usize = 10;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

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

    /// Defaults overridden by `GAMELINK_*` environment variables.
    ///
    /// Variables that are set but fail to parse are reported as `ConfigError`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_parse::<u16>("GAMELINK_SERVER_PORT")? {
            config.server.port = port;
            config.client.server_port = port;
        }

        if let Some(addr) = env_parse::<Ipv4Addr>("GAMELINK_BIND_ADDRESS")? {
            config.server.bind_address = addr;
        }

        if let Some(addr) = env_parse::<Ipv4Addr>("GAMELINK_SERVER_ADDRESS")? {
            config.client.server_address = addr;
        }

        if let Some(ms) = env_parse::<u64>("GAMELINK_CHALLENGE_TIMEOUT_MS")? {
            config.server.challenge_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = env_parse::<u64>("GAMELINK_CONNECTION_TIMEOUT_MS")? {
            config.server.connection_timeout = Duration::from_millis(ms);
            config.client.idle_timeout = Duration::from_millis(ms);
        }

        if let Some(enabled) = env_parse::<bool>("GAMELINK_ACTIVE_TIMEOUT")? {
            config.client.active_timeout = enabled;
        }

        if let Some(level) = std::env::var("GAMELINK_LOG_LEVEL").ok() {
            config.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
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
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
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

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {name}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

fn validate_timeout(errors: &mut Vec<String>, name: &str, value: Duration) {
    if value.as_millis() < 10 {
        errors.push(format!("{name} too short (minimum: 10ms)"));
    } else if value.as_secs() > 300 {
        errors.push(format!("{name} too long (maximum: 300s)"));
    }
}

fn validate_redundancy(errors: &mut Vec<String>, value: usize) {
    if value == 0 {
        errors.push("Disconnect redundancy must be at least 1".to_string());
    } else if value > 100 {
        errors.push(format!("Disconnect redundancy too high: {value} (maximum: 100)"));
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// UDP port to listen on
    pub port: u16,

    /// Interface to bind, `0.0.0.0` for all
    pub bind_address: Ipv4Addr,

    /// Pending challenges older than this are kicked
    #[serde(with = "duration_serde")]
    pub challenge_timeout: Duration,

    /// Idle connections older than this are kicked while in Game mode
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Whether `poll` expires stale challenges and connections at all
    pub timeout_sweep: bool,

    pub disconnect_redundancy: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: SERVER_PORT,
            bind_address: Ipv4Addr::UNSPECIFIED,
            challenge_timeout: Duration::from_secs(4),
            connection_timeout: Duration::from_secs(4),
            timeout_sweep: true,
            disconnect_redundancy: DISCONNECT_REDUNDANCY,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_broadcast() || self.bind_address.is_multicast() {
            errors.push(format!(
                "Invalid bind address: '{}' (expected a unicast or unspecified address)",
                self.bind_address
            ));
        }

        validate_timeout(&mut errors, "Challenge timeout", self.challenge_timeout);
        validate_timeout(&mut errors, "Connection timeout", self.connection_timeout);
        validate_redundancy(&mut errors, self.disconnect_redundancy);

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Port the server listens on
    pub server_port: u16,

    /// Where the ConnectionRequest goes; the broadcast address means LAN discovery
    pub server_address: Ipv4Addr,

    /// Local port, 0 for an ephemeral one
    pub client_port: u16,

    /// Disconnect after this long without a packet from the server
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Give up a handshake that has not completed within this interval
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Whether the idle timeout is enforced
    pub active_timeout: bool,

    pub disconnect_redundancy: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_port: SERVER_PORT,
            server_address: Ipv4Addr::BROADCAST,
            client_port: 0,
            idle_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            active_timeout: false,
            disconnect_redundancy: DISCONNECT_REDUNDANCY,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server_port == 0 {
            errors.push("Server port cannot be 0".to_string());
        }

        if self.server_address.is_unspecified() {
            errors.push("Server address cannot be 0.0.0.0".to_string());
        }

        validate_timeout(&mut errors, "Idle timeout", self.idle_timeout);
        validate_timeout(&mut errors, "Handshake timeout", self.handshake_timeout);
        validate_redundancy(&mut errors, self.disconnect_redundancy);

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("gamelink"),
            log_level: Level::INFO,
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
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
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
