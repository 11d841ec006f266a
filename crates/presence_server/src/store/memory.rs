//! In-memory store adapters.
//!
//! [`MemoryFastStore`] is the in-process stand-in for the deployment-time
//! shared key/value store (single-process scope). [`MemoryDurableStore`] is a
//! test double for the relational store.

use super::{
    DurableStore, FastStore, LivePosition, OnlinePresence, SpawnPoint, StoredPosition, ZoneDef,
};
use crate::error::StoreError;
use crate::{UserId, WorldId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

/// Fast store adapter backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryFastStore {
    positions: DashMap<(WorldId, UserId), LivePosition>,
    online: DashMap<WorldId, HashMap<UserId, String>>,
}

impl MemoryFastStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FastStore for MemoryFastStore {
    async fn put_position(
        &self,
        world: &WorldId,
        user: &UserId,
        record: LivePosition,
    ) -> Result<(), StoreError> {
        self.positions.insert((world.clone(), user.clone()), record);
        Ok(())
    }

    async fn get_position(
        &self,
        world: &WorldId,
        user: &UserId,
    ) -> Result<Option<LivePosition>, StoreError> {
        Ok(self
            .positions
            .get(&(world.clone(), user.clone()))
            .map(|r| r.value().clone()))
    }

    async fn remove_position(&self, world: &WorldId, user: &UserId) -> Result<(), StoreError> {
        self.positions.remove(&(world.clone(), user.clone()));
        Ok(())
    }

    async fn add_online(
        &self,
        world: &WorldId,
        user: &UserId,
        username: &str,
    ) -> Result<(), StoreError> {
        self.online
            .entry(world.clone())
            .or_default()
            .insert(user.clone(), username.to_string());
        Ok(())
    }

    async fn remove_online(&self, world: &WorldId, user: &UserId) -> Result<(), StoreError> {
        if let Some(mut members) = self.online.get_mut(world) {
            members.remove(user);
            if members.is_empty() {
                drop(members);
                self.online.remove_if(world, |_, m| m.is_empty());
            }
        }
        Ok(())
    }

    async fn online_users(&self, world: &WorldId) -> Result<Vec<OnlinePresence>, StoreError> {
        let Some(members) = self.online.get(world) else {
            return Ok(Vec::new());
        };
        let mut users: Vec<OnlinePresence> = members
            .iter()
            .map(|(user_id, username)| {
                let position = self
                    .positions
                    .get(&(world.clone(), user_id.clone()))
                    .map(|r| (r.x, r.y));
                OnlinePresence {
                    user_id: user_id.clone(),
                    username: username.clone(),
                    position,
                }
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(users)
    }
}

/// Durable store test double holding everything in maps.
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    positions: DashMap<(WorldId, UserId), StoredPosition>,
    zones: DashMap<WorldId, Vec<ZoneDef>>,
    spawns: DashMap<WorldId, Vec<SpawnPoint>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the zone list of a world, in load order.
    pub fn set_zones(&self, world: &str, zones: Vec<ZoneDef>) {
        self.zones.insert(world.to_string(), zones);
    }

    /// Seeds the spawn points of a world.
    pub fn set_spawn_points(&self, world: &str, spawns: Vec<SpawnPoint>) {
        self.spawns.insert(world.to_string(), spawns);
    }

    /// Number of durable position records, across all worlds.
    pub fn position_count(&self) -> usize {
        self.positions.len()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn load_position(
        &self,
        world: &WorldId,
        user: &UserId,
    ) -> Result<Option<StoredPosition>, StoreError> {
        Ok(self
            .positions
            .get(&(world.clone(), user.clone()))
            .map(|r| *r.value()))
    }

    async fn save_position(
        &self,
        world: &WorldId,
        user: &UserId,
        x: f64,
        y: f64,
    ) -> Result<(), StoreError> {
        self.positions.insert(
            (world.clone(), user.clone()),
            StoredPosition { x, y, updated_at: super::unix_now() },
        );
        Ok(())
    }

    async fn zones(&self, world: &WorldId) -> Result<Vec<ZoneDef>, StoreError> {
        Ok(self.zones.get(world).map(|z| z.clone()).unwrap_or_default())
    }

    async fn spawn_points(&self, world: &WorldId) -> Result<Vec<SpawnPoint>, StoreError> {
        Ok(self.spawns.get(world).map(|s| s.clone()).unwrap_or_default())
    }
}
