//! Zone membership lifecycle manager.
//!
//! State machine per zone id: absent → active on first enter, active →
//! absent when the member count reaches zero. Per user: at most one zone at
//! a time; entering a second zone implicitly exits the current one first.

use crate::{UserId, ZoneId};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::info;

/// Point-in-time view of one active zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSnapshot {
    pub zone_id: ZoneId,
    pub zone_type: String,
    /// Member ids, sorted for deterministic snapshots
    pub members: Vec<UserId>,
    pub member_count: usize,
}

/// Result of an [`ZoneLifecycle::enter`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct EnterOutcome {
    /// The entered zone, after insertion
    pub snapshot: ZoneSnapshot,
    /// The zone the user was implicitly removed from, if any
    pub previous_zone: Option<ZoneId>,
}

#[derive(Default)]
struct ZoneTables {
    /// zone id -> member ids currently inside
    zones: HashMap<ZoneId, HashSet<UserId>>,
    /// zone id -> classification recorded at creation
    zone_types: HashMap<ZoneId, String>,
    /// user id -> current zone (exclusive)
    user_zones: HashMap<UserId, ZoneId>,
}

impl ZoneTables {
    fn snapshot(&self, zone_id: &ZoneId) -> Option<ZoneSnapshot> {
        let members = self.zones.get(zone_id)?;
        let mut sorted: Vec<UserId> = members.iter().cloned().collect();
        sorted.sort();
        Some(ZoneSnapshot {
            zone_id: zone_id.clone(),
            zone_type: self
                .zone_types
                .get(zone_id)
                .cloned()
                .unwrap_or_else(|| "PUBLIC".to_string()),
            member_count: sorted.len(),
            members: sorted,
        })
    }

    /// Removes the user from a zone; true iff the zone got destroyed.
    fn exit(&mut self, zone_id: &ZoneId, user: &UserId) -> bool {
        let Some(members) = self.zones.get_mut(zone_id) else {
            return false;
        };
        members.remove(user);

        if self.user_zones.get(user) == Some(zone_id) {
            self.user_zones.remove(user);
        }

        if self.zones.get(zone_id).is_some_and(|m| m.is_empty()) {
            self.zones.remove(zone_id);
            self.zone_types.remove(zone_id);
            info!("🧹 Zone destroyed: {} (empty)", zone_id);
            return true;
        }
        false
    }
}

/// Manages zone membership across all sessions of the process.
///
/// One consolidated table set behind a single async mutex; every operation
/// is a short critical section, so contention stays negligible next to the
/// socket I/O around it.
#[derive(Default)]
pub struct ZoneLifecycle {
    tables: Mutex<ZoneTables>,
}

impl ZoneLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts `user` into `zone_id`, creating the zone's live context on first
    /// entry and implicitly exiting any previously occupied zone.
    ///
    /// Idempotent for repeated identical entries. Returns the zone state
    /// after insertion together with the implicitly exited zone, if any.
    pub async fn enter(
        &self,
        zone_id: &ZoneId,
        user: &UserId,
        username: &str,
        zone_type: &str,
    ) -> EnterOutcome {
        let mut tables = self.tables.lock().await;

        let previous_zone = match tables.user_zones.get(user).cloned() {
            Some(current) if current == *zone_id => None,
            Some(current) => {
                tables.exit(&current, user);
                Some(current)
            }
            None => None,
        };

        if !tables.zones.contains_key(zone_id) {
            tables.zones.insert(zone_id.clone(), HashSet::new());
            tables.zone_types.insert(zone_id.clone(), zone_type.to_string());
            info!("🏗️  Zone created: {} ({})", zone_id, zone_type);
        }
        if let Some(members) = tables.zones.get_mut(zone_id) {
            members.insert(user.clone());
        }
        tables.user_zones.insert(user.clone(), zone_id.clone());

        let snapshot = tables
            .snapshot(zone_id)
            .unwrap_or(ZoneSnapshot {
                zone_id: zone_id.clone(),
                zone_type: zone_type.to_string(),
                members: vec![user.clone()],
                member_count: 1,
            });
        info!("👋 {} entered {} (now {} users)", username, zone_id, snapshot.member_count);

        EnterOutcome { snapshot, previous_zone }
    }

    /// Removes `user` from `zone_id`.
    ///
    /// Returns true iff the zone was destroyed as a result (its member count
    /// reached zero). A no-op returning false when the zone or the
    /// membership did not exist.
    pub async fn exit(&self, zone_id: &ZoneId, user: &UserId) -> bool {
        self.tables.lock().await.exit(zone_id, user)
    }

    /// Current members of a zone, or empty when the zone is not active.
    pub async fn members_of(&self, zone_id: &ZoneId) -> Vec<UserId> {
        self.tables
            .lock()
            .await
            .snapshot(zone_id)
            .map(|s| s.members)
            .unwrap_or_default()
    }

    /// The zone a user currently occupies, if any.
    pub async fn zone_of(&self, user: &UserId) -> Option<ZoneId> {
        self.tables.lock().await.user_zones.get(user).cloned()
    }

    /// Unconditional disconnect hook: exits whatever zone the user occupies.
    ///
    /// Returns the exited zone and whether it was destroyed; `None` when the
    /// user was not in any zone. Safe to call repeatedly.
    pub async fn cleanup(&self, user: &UserId) -> Option<(ZoneId, bool)> {
        let mut tables = self.tables.lock().await;
        let zone_id = tables.user_zones.get(user).cloned()?;
        let destroyed = tables.exit(&zone_id, user);
        Some((zone_id, destroyed))
    }

    /// Number of currently active zones.
    pub async fn active_zones(&self) -> usize {
        self.tables.lock().await.zones.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<UserId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn first_enter_creates_and_last_exit_destroys() {
        let zones = ZoneLifecycle::new();
        let room = "room-1".to_string();

        let outcome = zones.enter(&room, &"a".to_string(), "ada", "PUBLIC").await;
        assert_eq!(outcome.snapshot.members, ids(&["a"]));
        assert_eq!(outcome.previous_zone, None);
        assert_eq!(zones.active_zones().await, 1);

        zones.enter(&room, &"b".to_string(), "bob", "PUBLIC").await;
        assert!(!zones.exit(&room, &"a".to_string()).await);
        assert!(zones.exit(&room, &"b".to_string()).await);
        assert_eq!(zones.active_zones().await, 0);

        // Re-entry recreates the zone with a fresh member set
        let outcome = zones.enter(&room, &"c".to_string(), "cy", "PRIVATE").await;
        assert_eq!(outcome.snapshot.members, ids(&["c"]));
        assert_eq!(outcome.snapshot.zone_type, "PRIVATE");
    }

    #[tokio::test]
    async fn membership_is_exclusive() {
        let zones = ZoneLifecycle::new();
        let user = "a".to_string();

        zones.enter(&"room-1".to_string(), &user, "ada", "PUBLIC").await;
        let outcome = zones.enter(&"room-2".to_string(), &user, "ada", "PUBLIC").await;

        assert_eq!(outcome.previous_zone.as_deref(), Some("room-1"));
        assert_eq!(zones.zone_of(&user).await.as_deref(), Some("room-2"));
        assert!(zones.members_of(&"room-1".to_string()).await.is_empty());
        assert_eq!(zones.members_of(&"room-2".to_string()).await, ids(&["a"]));
        // room-1 emptied out, so only room-2 remains active
        assert_eq!(zones.active_zones().await, 1);
    }

    #[tokio::test]
    async fn repeated_enter_is_idempotent() {
        let zones = ZoneLifecycle::new();
        let room = "room-1".to_string();
        let user = "a".to_string();

        zones.enter(&room, &user, "ada", "PUBLIC").await;
        let outcome = zones.enter(&room, &user, "ada", "PUBLIC").await;
        assert_eq!(outcome.snapshot.member_count, 1);
        assert_eq!(outcome.previous_zone, None);
    }

    #[tokio::test]
    async fn exit_of_unknown_zone_or_member_is_a_no_op() {
        let zones = ZoneLifecycle::new();
        assert!(!zones.exit(&"ghost".to_string(), &"a".to_string()).await);

        zones.enter(&"room-1".to_string(), &"a".to_string(), "ada", "PUBLIC").await;
        assert!(!zones.exit(&"room-1".to_string(), &"b".to_string()).await);
        assert_eq!(zones.members_of(&"room-1".to_string()).await, ids(&["a"]));
    }

    #[tokio::test]
    async fn cleanup_is_safe_to_repeat() {
        let zones = ZoneLifecycle::new();
        let user = "a".to_string();
        zones.enter(&"room-1".to_string(), &user, "ada", "PUBLIC").await;

        assert_eq!(zones.cleanup(&user).await, Some(("room-1".to_string(), true)));
        assert_eq!(zones.cleanup(&user).await, None);
        assert_eq!(zones.zone_of(&user).await, None);
    }

    #[tokio::test]
    async fn concurrent_enters_keep_tables_consistent() {
        let zones = std::sync::Arc::new(ZoneLifecycle::new());
        let room = "room-1".to_string();
        let mut handles = Vec::new();
        for i in 0..16 {
            let zones = zones.clone();
            let room = room.clone();
            handles.push(tokio::spawn(async move {
                let user = format!("user-{i}");
                zones.enter(&room, &user, &user, "PUBLIC").await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(zones.members_of(&room).await.len(), 16);
        assert_eq!(zones.active_zones().await, 1);
    }
}
