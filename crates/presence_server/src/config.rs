//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default values
//! used to initialize and customize presence server behavior.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration structure for the presence server.
///
/// Contains all necessary parameters to configure server behavior including
/// network settings, delivery budgets, position-sync intervals, and the
/// spatial cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Secret used to validate bearer tokens (HS256)
    pub jwt_secret: String,

    /// Per-recipient delivery budget for broadcast fan-out, in milliseconds.
    /// A recipient that cannot accept the message within this budget is
    /// skipped for that message.
    pub broadcast_timeout_ms: u64,

    /// Capacity of each connection's outbound message queue
    pub outbound_buffer: usize,

    /// Minimum spacing between successive durable writes of one user's
    /// position, in seconds
    pub move_persist_interval_secs: u64,

    /// Interval of the per-session fallback durable save task, in seconds
    pub autosave_interval_secs: u64,

    /// Maximum number of worlds whose zone definitions are cached at once
    pub zone_cache_capacity: usize,

    /// Character ceiling for chat and proximity-chat message text;
    /// oversized messages are ignored
    pub max_chat_len: usize,

    /// Manhattan-distance radius for proximity chat, in tiles
    pub proximity_radius: f64,

    /// Spawn coordinate used when a world has neither a durable position for
    /// the user nor any declared spawn points
    pub spawn_fallback: SpawnFallback,
}

/// Fixed fallback coordinate for initial placement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpawnFallback {
    pub x: f64,
    pub y: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8000".parse().expect("Invalid default bind address"),
            max_connections: 1000,
            jwt_secret: "change-me".to_string(),
            broadcast_timeout_ms: 250,
            outbound_buffer: 64,
            move_persist_interval_secs: 5,
            autosave_interval_secs: 30,
            zone_cache_capacity: 64,
            max_chat_len: 500,
            proximity_radius: 5.0,
            spawn_fallback: SpawnFallback { x: 15.0, y: 15.0 },
        }
    }
}

impl ServerConfig {
    /// Per-recipient broadcast delivery budget as a [`Duration`].
    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    /// Minimum spacing between durable position writes as a [`Duration`].
    pub fn move_persist_interval(&self) -> Duration {
        Duration::from_secs(self.move_persist_interval_secs)
    }

    /// Fallback autosave cadence as a [`Duration`].
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.spawn_fallback.x, 15.0);
        assert_eq!(config.spawn_fallback.y, 15.0);
        assert!(config.broadcast_timeout() < Duration::from_secs(1));
        assert!(config.move_persist_interval() >= Duration::from_secs(1));
        assert!(config.autosave_interval() > config.move_persist_interval());
    }
}
