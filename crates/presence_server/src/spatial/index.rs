//! Per-world zone-definition cache with bounded capacity.
//!
//! Zone definitions are loaded once per world via [`ZoneIndex::warm`], the
//! only load point, invoked at session connect time. Lookups afterwards are
//! pure in-memory scans. Definitions are effectively immutable for the
//! process lifetime of a cached world; the only way an entry leaves the
//! cache is recency-based eviction under capacity pressure, after which the
//! next connecting session re-warms it.

use crate::error::StoreError;
use crate::store::{DurableStore, ZoneDef};
use crate::WorldId;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

struct CachedZones {
    /// Zone definitions in load order; overlap resolves to the first match
    zones: Arc<Vec<ZoneDef>>,
    last_access: Instant,
}

/// Bounded cache of zone definitions, keyed by world.
pub struct ZoneIndex {
    worlds: DashMap<WorldId, CachedZones>,
    capacity: usize,
    store: Arc<dyn DurableStore>,
}

impl ZoneIndex {
    /// Creates an index over the given durable store.
    ///
    /// `capacity` bounds the number of worlds cached at once; a zero
    /// capacity is treated as one.
    pub fn new(store: Arc<dyn DurableStore>, capacity: usize) -> Self {
        Self {
            worlds: DashMap::new(),
            capacity: capacity.max(1),
            store,
        }
    }

    /// Loads the zone definitions of `world` if not already cached.
    ///
    /// Idempotent, and safe under concurrent first-joiners: when two
    /// sessions race to warm the same world, one load wins and the other's
    /// result is discarded. At capacity the least-recently-used world is
    /// evicted first.
    pub async fn warm(&self, world: &WorldId) -> Result<(), StoreError> {
        if let Some(mut cached) = self.worlds.get_mut(world) {
            cached.last_access = Instant::now();
            return Ok(());
        }

        let zones = self.store.zones(world).await?;
        debug!("🔄 Loaded {} zone(s) for world {}", zones.len(), world);

        self.worlds
            .entry(world.clone())
            .or_insert_with(|| CachedZones {
                zones: Arc::new(zones),
                last_access: Instant::now(),
            });

        while self.worlds.len() > self.capacity {
            if !self.evict_lru() {
                break;
            }
        }
        Ok(())
    }

    /// Returns the first zone (in load order) whose rectangle contains the
    /// point, inclusive on all four edges, or `None` for open space.
    ///
    /// Never performs I/O: a world that was never warmed answers `None`.
    pub fn locate(&self, world: &WorldId, x: f64, y: f64) -> Option<ZoneDef> {
        let mut cached = self.worlds.get_mut(world)?;
        cached.last_access = Instant::now();
        let zones = cached.zones.clone();
        drop(cached);

        zones.iter().find(|z| z.bounds.contains(x, y)).cloned()
    }

    /// Looks a cached zone up by id. Like [`locate`](Self::locate), never
    /// performs I/O.
    pub fn zone_by_id(&self, world: &WorldId, zone_id: &str) -> Option<ZoneDef> {
        let cached = self.worlds.get(world)?;
        cached.zones.iter().find(|z| z.id == zone_id).cloned()
    }

    /// Whether a world's definitions are currently cached.
    pub fn is_warm(&self, world: &WorldId) -> bool {
        self.worlds.contains_key(world)
    }

    /// Number of worlds currently cached.
    pub fn len(&self) -> usize {
        self.worlds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worlds.is_empty()
    }

    /// Evicts the least recently used world entry. Returns false when no
    /// candidate was found.
    fn evict_lru(&self) -> bool {
        let mut oldest_key: Option<WorldId> = None;
        let mut oldest_time = Instant::now();

        for entry in self.worlds.iter() {
            if entry.value().last_access <= oldest_time {
                oldest_time = entry.value().last_access;
                oldest_key = Some(entry.key().clone());
            }
        }

        match oldest_key {
            Some(key) => {
                self.worlds.remove(&key);
                info!("🧹 Evicted zone cache for world {}", key);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDurableStore, ZoneBounds};

    fn zone(id: &str, x: f64, y: f64, w: f64, h: f64) -> ZoneDef {
        ZoneDef {
            id: id.to_string(),
            name: id.to_string(),
            zone_type: "PUBLIC".to_string(),
            bounds: ZoneBounds { x, y, width: w, height: h },
        }
    }

    fn seeded_store() -> Arc<MemoryDurableStore> {
        let store = Arc::new(MemoryDurableStore::new());
        store.set_zones(
            "w1",
            vec![zone("first", 0.0, 0.0, 10.0, 10.0), zone("second", 5.0, 5.0, 10.0, 10.0)],
        );
        store
    }

    #[tokio::test]
    async fn locate_without_warm_is_open_space() {
        let index = ZoneIndex::new(seeded_store(), 4);
        assert!(index.locate(&"w1".to_string(), 1.0, 1.0).is_none());
        assert!(!index.is_warm(&"w1".to_string()));
    }

    #[tokio::test]
    async fn first_match_wins_in_load_order() {
        let index = ZoneIndex::new(seeded_store(), 4);
        let world = "w1".to_string();
        index.warm(&world).await.unwrap();

        // (7, 7) is inside both rectangles; load order decides
        let hit = index.locate(&world, 7.0, 7.0).expect("inside both zones");
        assert_eq!(hit.id, "first");

        // Inclusive on the far edges
        let edge = index.locate(&world, 15.0, 15.0).expect("on second's corner");
        assert_eq!(edge.id, "second");

        assert!(index.locate(&world, 50.0, 50.0).is_none());
    }

    #[tokio::test]
    async fn warm_is_idempotent() {
        let index = ZoneIndex::new(seeded_store(), 4);
        let world = "w1".to_string();
        index.warm(&world).await.unwrap();
        index.warm(&world).await.unwrap();
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_warms_do_not_double_insert() {
        let index = Arc::new(ZoneIndex::new(seeded_store(), 4));
        let world = "w1".to_string();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let index = index.clone();
            let world = world.clone();
            handles.push(tokio::spawn(async move { index.warm(&world).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(index.len(), 1);
        assert!(index.locate(&world, 1.0, 1.0).is_some());
    }

    #[tokio::test]
    async fn eviction_removes_least_recently_used_world() {
        let store = Arc::new(MemoryDurableStore::new());
        for w in ["w1", "w2", "w3"] {
            store.set_zones(w, vec![zone(w, 0.0, 0.0, 1.0, 1.0)]);
        }
        let index = ZoneIndex::new(store, 2);

        index.warm(&"w1".to_string()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        index.warm(&"w2".to_string()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // Touch w1 so w2 becomes the stalest entry
        index.locate(&"w1".to_string(), 0.5, 0.5);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        index.warm(&"w3".to_string()).await.unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.is_warm(&"w1".to_string()));
        assert!(!index.is_warm(&"w2".to_string()));
        assert!(index.is_warm(&"w3".to_string()));
    }
}
