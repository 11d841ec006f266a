//! Store ports and adapters.
//!
//! Two stores back the presence layer:
//!
//! * the **fast store** holds live position records and per-world online
//!   sets; volatile working state, last-write-wins, never the system of
//!   record;
//! * the **durable store** holds each user's last-known position per world
//!   (the resume point for the next session) plus the zone definitions and
//!   spawn points authored for each world's map.
//!
//! The two are reconciled as an eventually-consistent mirror: movement
//! updates hit the fast store immediately and the durable store on a
//! throttle, with one unconditional durable write on disconnect.

use crate::error::StoreError;
use crate::{UserId, WorldId, ZoneId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryDurableStore, MemoryFastStore};
pub use sqlite::SqliteDurableStore;

/// A user's live position record in the fast store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePosition {
    pub x: f64,
    pub y: f64,
    pub username: String,
}

/// One member of a world's online set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlinePresence {
    pub user_id: UserId,
    pub username: String,
    /// Live coordinates, when a position record exists alongside the
    /// online-set entry
    pub position: Option<(f64, f64)>,
}

/// A durable last-known position for (world, user).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredPosition {
    pub x: f64,
    pub y: f64,
    /// Unix seconds of the last write
    pub updated_at: i64,
}

/// An axis-aligned rectangular zone declared on a world's map.
///
/// Identity is the zone id. Zones may overlap; lookups resolve overlap by
/// load order (first match wins), which must be preserved for compatibility
/// with the map tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDef {
    pub id: ZoneId,
    pub name: String,
    /// Classification affecting chat scoping, e.g. `"PUBLIC"` or
    /// `"PRIVATE"`; an open set owned by the map tooling
    pub zone_type: String,
    pub bounds: ZoneBounds,
}

/// Rectangle of a [`ZoneDef`], in tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ZoneBounds {
    /// Containment test, inclusive on all four edges.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }
}

/// A named spawn point declared on a world's map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

/// The fast shared state store: live positions and online sets.
///
/// All operations are best-effort from the session's point of view; a failed
/// call degrades presence features to registry-only behavior instead of
/// failing the session.
#[async_trait]
pub trait FastStore: Send + Sync {
    /// Upserts a user's live position record. Last write wins.
    async fn put_position(
        &self,
        world: &WorldId,
        user: &UserId,
        record: LivePosition,
    ) -> Result<(), StoreError>;

    /// Reads a user's live position record, if any.
    async fn get_position(
        &self,
        world: &WorldId,
        user: &UserId,
    ) -> Result<Option<LivePosition>, StoreError>;

    /// Deletes a user's live position record. No-op when absent.
    async fn remove_position(&self, world: &WorldId, user: &UserId) -> Result<(), StoreError>;

    /// Adds a user to the world's online set.
    async fn add_online(
        &self,
        world: &WorldId,
        user: &UserId,
        username: &str,
    ) -> Result<(), StoreError>;

    /// Removes a user from the world's online set. No-op when absent.
    async fn remove_online(&self, world: &WorldId, user: &UserId) -> Result<(), StoreError>;

    /// Snapshot of the world's online set, joined with live positions where
    /// they exist.
    async fn online_users(&self, world: &WorldId) -> Result<Vec<OnlinePresence>, StoreError>;
}

/// The durable store: resume positions and per-world map data.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Reads the last durably recorded position for (world, user).
    async fn load_position(
        &self,
        world: &WorldId,
        user: &UserId,
    ) -> Result<Option<StoredPosition>, StoreError>;

    /// Upserts the durable position for (world, user).
    async fn save_position(
        &self,
        world: &WorldId,
        user: &UserId,
        x: f64,
        y: f64,
    ) -> Result<(), StoreError>;

    /// Zone definitions of a world, in load order.
    async fn zones(&self, world: &WorldId) -> Result<Vec<ZoneDef>, StoreError>;

    /// Declared spawn points of a world.
    async fn spawn_points(&self, world: &WorldId) -> Result<Vec<SpawnPoint>, StoreError>;
}

/// Current unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_inclusive_on_all_edges() {
        let b = ZoneBounds { x: 10.0, y: 20.0, width: 5.0, height: 4.0 };
        assert!(b.contains(10.0, 20.0));
        assert!(b.contains(15.0, 24.0));
        assert!(b.contains(12.5, 22.0));
        assert!(!b.contains(9.999, 22.0));
        assert!(!b.contains(15.001, 22.0));
        assert!(!b.contains(12.0, 24.001));
    }
}
