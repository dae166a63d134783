//! Server configuration loading from file and environment variables.

use palaver_voice::{EngineConfig, FilterConfig, SessionConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Dialogue engine timing and capacity knobs.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Session template applied to every connection.
    #[serde(default)]
    pub session: SessionConfig,

    /// Input filter settings.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Recognizer connection pool settings.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Usage reporting settings.
    #[serde(default)]
    pub usage: UsageConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "palaver_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Recognizer connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Maximum provider connections open at once, across all sessions.
    #[serde(default = "default_pool_capacity")]
    pub capacity: usize,
}

/// Usage reporting configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageConfig {
    /// HTTP endpoint usage records are posted to. Records are logged
    /// locally when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pool_capacity() -> usize {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_pool_capacity(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PALAVER_HOST` overrides `server.host`
/// - `PALAVER_PORT` overrides `server.port`
/// - `PALAVER_LOG_LEVEL` overrides `logging.level`
/// - `PALAVER_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `PALAVER_POOL_CAPACITY` overrides `pool.capacity`
/// - `PALAVER_USAGE_ENDPOINT` overrides `usage.endpoint`
/// - `PALAVER_FILTER_DICTIONARY` overrides `filter.dictionary_path`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("PALAVER_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("PALAVER_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(level) = std::env::var("PALAVER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("PALAVER_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(capacity) = std::env::var("PALAVER_POOL_CAPACITY") {
        if let Ok(parsed) = capacity.parse() {
            config.pool.capacity = parsed;
        }
    }
    if let Ok(endpoint) = std::env::var("PALAVER_USAGE_ENDPOINT") {
        if !endpoint.trim().is_empty() {
            config.usage.endpoint = Some(endpoint);
        }
    }
    if let Ok(dictionary) = std::env::var("PALAVER_FILTER_DICTIONARY") {
        if !dictionary.trim().is_empty() {
            config.filter.dictionary_path = Some(dictionary);
        }
    }

    Ok(config)
}
