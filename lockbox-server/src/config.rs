//! Configuration loading for lockbox-server.
//!
//! Configuration is loaded from a TOML file (default: `lockbox.toml`).
//! Every section and every field is optional.

use lockbox_types::HashParams;
use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for lockbox-server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener and worker pool configuration.
    pub server: ServerConfig,
    /// Storage and size limit configuration.
    pub storage: StorageConfig,
    /// Auth key hashing parameters.
    pub auth: HashParams,
    /// Rate limiting configuration.
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
    /// Release-key expiry sweep configuration.
    pub cleanup: CleanupConfig,
    /// Log output configuration.
    pub logging: LoggingConfig,
}

/// Frame bytes reserved for the parts of an ItemFetch response other than
/// the item contents.
pub const ITEM_RESPONSE_OVERHEAD: usize = 256;

impl StorageConfig {
    /// Largest item contents whose fetch response still fits in one frame.
    pub fn max_item_contents(&self) -> usize {
        self.max_frame_size.saturating_sub(ITEM_RESPONSE_OVERHEAD)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// TCP bind address for the protocol listener (default: 0.0.0.0:2048).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Maximum simultaneously open client connections (default: 1024).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum requests handled concurrently across all connections (default: 10).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Maximum frame payload in bytes, either direction (default: 64 MiB).
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Maximum `Send.content` size in bytes (default: 4096).
    #[serde(default = "default_max_send_content")]
    pub max_send_content: usize,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum new connections per remote IP per minute (default: 60).
    #[serde(default = "default_connections_per_minute")]
    pub connections_per_minute: u32,
    /// Maximum login attempts per email per minute (default: 10).
    #[serde(default = "default_login_attempts_per_minute")]
    pub login_attempts_per_minute: u32,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Sweep interval in seconds (default: 60).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable cleanup task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Plain,
    /// One JSON object per event.
    Json,
}

/// Logging configuration. `RUST_LOG` still controls the level filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Output format (default: plain).
    #[serde(default)]
    pub format: LogFormat,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:2048".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_workers() -> usize {
    10
}

fn default_database_path() -> PathBuf {
    PathBuf::from("lockbox.db")
}

fn default_max_frame_size() -> usize {
    lockbox_core::DEFAULT_MAX_FRAME_SIZE
}

fn default_max_send_content() -> usize {
    4096
}

fn default_connections_per_minute() -> u32 {
    60
}

fn default_login_attempts_per_minute() -> u32 {
    10
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_connections: default_max_connections(),
            max_workers: default_max_workers(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            max_frame_size: default_max_frame_size(),
            max_send_content: default_max_send_content(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connections_per_minute: default_connections_per_minute(),
            login_attempts_per_minute: default_login_attempts_per_minute(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("server.max_connections", self.server.max_connections == 0),
            ("server.max_workers", self.server.max_workers == 0),
            (
                "limits.connections_per_minute",
                self.limits.connections_per_minute == 0,
            ),
            (
                "limits.login_attempts_per_minute",
                self.limits.login_attempts_per_minute == 0,
            ),
            ("cleanup.interval_secs", self.cleanup.interval_secs == 0),
        ];
        if let Some((field, _)) = checks.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Invalid {
                field: *field,
                reason: "must be greater than zero",
            });
        }
        if self.storage.max_frame_size <= ITEM_RESPONSE_OVERHEAD {
            return Err(ConfigError::Invalid {
                field: "storage.max_frame_size",
                reason: "must leave room for item contents",
            });
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config value {field}: {reason}")]
    Invalid {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}
