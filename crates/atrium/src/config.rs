//! Configuration management for the AtriumVerse presence server.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files and command-line arguments.

use presence_server::config::SpawnFallback;
use presence_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_max_connections() -> usize {
    1000
}

fn default_broadcast_timeout_ms() -> u64 {
    250
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_move_persist_interval() -> u64 {
    5
}

fn default_autosave_interval() -> u64 {
    30
}

fn default_zone_cache_capacity() -> usize {
    64
}

fn default_max_chat_len() -> usize {
    500
}

fn default_proximity_radius() -> f64 {
    5.0
}

fn default_spawn_coordinate() -> f64 {
    15.0
}

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Authentication settings
    pub auth: AuthSettings,
    /// Storage settings
    pub storage: StorageSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:8000")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Per-recipient broadcast delivery budget in milliseconds
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,
    /// Capacity of each connection's outbound queue
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Minimum seconds between durable position writes per user
    #[serde(default = "default_move_persist_interval")]
    pub move_persist_interval_secs: u64,
    /// Seconds between fallback durable saves per session
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_secs: u64,
    /// Number of worlds whose zones are cached at once
    #[serde(default = "default_zone_cache_capacity")]
    pub zone_cache_capacity: usize,
    /// Character ceiling for chat messages
    #[serde(default = "default_max_chat_len")]
    pub max_chat_len: usize,
    /// Manhattan-distance radius for proximity chat
    #[serde(default = "default_proximity_radius")]
    pub proximity_radius: f64,
    /// Fallback spawn X coordinate
    #[serde(default = "default_spawn_coordinate")]
    pub spawn_fallback_x: f64,
    /// Fallback spawn Y coordinate
    #[serde(default = "default_spawn_coordinate")]
    pub spawn_fallback_y: f64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8000".to_string(),
            max_connections: default_max_connections(),
            broadcast_timeout_ms: default_broadcast_timeout_ms(),
            outbound_buffer: default_outbound_buffer(),
            move_persist_interval_secs: default_move_persist_interval(),
            autosave_interval_secs: default_autosave_interval(),
            zone_cache_capacity: default_zone_cache_capacity(),
            max_chat_len: default_max_chat_len(),
            proximity_radius: default_proximity_radius(),
            spawn_fallback_x: default_spawn_coordinate(),
            spawn_fallback_y: default_spawn_coordinate(),
        }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Shared HS256 secret for access-token validation
    pub jwt_secret: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self { jwt_secret: "change-me".to_string() }
    }
}

/// Storage settings for the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Durable store URL (SQLite)
    pub database_url: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { database_url: "sqlite://atrium.db".to_string() }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Whether to emit JSON-formatted logs
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json_format: false }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, creating the file with default
    /// values when it does not exist.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            tokio::fs::write(path, content).await?;
            info!("📝 Created default configuration at {}", path.display());
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validates the merged configuration before startup.
    pub fn validate(&self) -> Result<(), String> {
        self.server
            .bind_address
            .parse::<std::net::SocketAddr>()
            .map_err(|e| format!("invalid bind_address '{}': {e}", self.server.bind_address))?;

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(format!("invalid log level '{other}'")),
        }

        if self.auth.jwt_secret.is_empty() {
            return Err("auth.jwt_secret must not be empty".to_string());
        }
        if self.server.max_connections == 0 {
            return Err("server.max_connections must be at least 1".to_string());
        }
        if self.storage.database_url.is_empty() {
            return Err("storage.database_url must not be empty".to_string());
        }
        Ok(())
    }

    /// Converts the file settings into the library's [`ServerConfig`].
    pub fn to_server_config(&self) -> Result<ServerConfig, String> {
        let bind_address = self
            .server
            .bind_address
            .parse()
            .map_err(|e| format!("invalid bind_address: {e}"))?;

        Ok(ServerConfig {
            bind_address,
            max_connections: self.server.max_connections,
            jwt_secret: self.auth.jwt_secret.clone(),
            broadcast_timeout_ms: self.server.broadcast_timeout_ms,
            outbound_buffer: self.server.outbound_buffer,
            move_persist_interval_secs: self.server.move_persist_interval_secs,
            autosave_interval_secs: self.server.autosave_interval_secs,
            zone_cache_capacity: self.server.zone_cache_capacity,
            max_chat_len: self.server.max_chat_len,
            proximity_radius: self.server.proximity_radius,
            spawn_fallback: SpawnFallback {
                x: self.server.spawn_fallback_x,
                y: self.server.spawn_fallback_y,
            },
        })
    }
}
