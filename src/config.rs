use crate::error::{HubError, Result};
use crate::hub::{
    HubConfig, DEFAULT_CLIENT_QUEUE_CAPACITY, DEFAULT_CLOSE_GRACE, DEFAULT_INBOX_CAPACITY,
    DEFAULT_WRITE_TIMEOUT,
};
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket server configuration
    pub server: ServerConfig,
    /// Broadcast hub sizing
    pub hub: HubConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the server (default: 8083)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
    /// Largest message accepted by /notify, in bytes
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl LogConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            server: ServerConfig {
                port: get_env_or("HERALD_PORT", "8083").parse().map_err(|_| {
                    HubError::InvalidConfig("HERALD_PORT must be a valid port number".into())
                })?,
                host: get_env_or("HERALD_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                max_message_bytes: parse_positive("NOTIFY_MAX_MESSAGE_BYTES", 64 * 1024)?,
            },
            hub: HubConfig {
                inbox_capacity: parse_positive("HUB_INBOX_CAPACITY", DEFAULT_INBOX_CAPACITY)?,
                client_queue_capacity: parse_positive(
                    "HUB_CLIENT_QUEUE_CAPACITY",
                    DEFAULT_CLIENT_QUEUE_CAPACITY,
                )?,
                write_timeout: Duration::from_millis(parse_positive(
                    "HUB_WRITE_TIMEOUT_MS",
                    DEFAULT_WRITE_TIMEOUT.as_millis() as usize,
                )? as u64),
                close_grace: Duration::from_millis(parse_positive(
                    "HUB_CLOSE_GRACE_MS",
                    DEFAULT_CLOSE_GRACE.as_millis() as usize,
                )? as u64),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Parse a non-zero count, falling back to `default` when unset
fn parse_positive(key: &str, default: usize) -> Result<usize> {
    let raw = match env::var(key) {
        Ok(raw) => raw,
        Err(_) => return Ok(default),
    };

    match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(HubError::InvalidConfig(format!(
            "{} must be a positive number",
            key
        ))),
        Ok(n) => Ok(n),
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
