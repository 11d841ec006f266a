//! Connection registry for tracking and delivering to live connections.
//!
//! This module provides the central registry of live connections, partitioned
//! by world, with best-effort broadcast fan-out and personal delivery.

use super::{ConnectionHandle, SessionId};
use crate::protocol::ServerEvent;
use crate::{UserId, WorldId};
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Central registry of live connections.
///
/// Maps each world to the delivery handles of its connected users. Mutation
/// is serialized per world through the map's entry locking; broadcast
/// snapshots the handles out of the lock and fans out concurrently, so a
/// slow recipient only ever costs its own delivery budget.
///
/// # Architecture
///
/// * `DashMap<WorldId, HashMap<UserId, ConnectionHandle>>` for per-world
///   serialization of registration changes
/// * Exclusion by user id, not handle identity, so broadcasts exclude the
///   sender correctly across reconnects
/// * Per-recipient delivery timeout; a timed-out delivery is dropped
///   silently and never aborts the rest of the fan-out
pub struct ConnectionRegistry {
    worlds: DashMap<WorldId, HashMap<UserId, ConnectionHandle>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    /// Creates a registry whose deliveries are bounded by `send_timeout`.
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            worlds: DashMap::new(),
            send_timeout,
        }
    }

    /// Installs the delivery handle for (world, user).
    ///
    /// Last writer wins: an existing entry is replaced and returned so the
    /// caller can tear the displaced session down.
    pub fn register(
        &self,
        world: &WorldId,
        user: &UserId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let displaced = self
            .worlds
            .entry(world.clone())
            .or_default()
            .insert(user.clone(), handle);
        if displaced.is_some() {
            info!("🔁 Connection for {} in world {} replaced by reconnect", user, world);
        } else {
            debug!("🔗 Registered {} in world {}", user, world);
        }
        displaced
    }

    /// Removes the mapping for (world, user); a no-op when absent.
    ///
    /// The world's entry is dropped entirely once its member set empties.
    pub fn unregister(&self, world: &WorldId, user: &UserId) {
        if let Some(mut entry) = self.worlds.get_mut(world) {
            if entry.remove(user).is_some() {
                debug!("❌ Unregistered {} from world {}", user, world);
            }
        }
        self.worlds.remove_if(world, |_, users| users.is_empty());
    }

    /// Like [`unregister`](Self::unregister), but only removes the entry
    /// when it still belongs to `session`. Used by terminating handlers so a
    /// displaced connection never removes its replacement.
    pub fn unregister_exact(&self, world: &WorldId, user: &UserId, session: SessionId) -> bool {
        let mut removed = false;
        if let Some(mut entry) = self.worlds.get_mut(world) {
            if entry.get(user).is_some_and(|h| h.session_id() == session) {
                entry.remove(user);
                removed = true;
                debug!("❌ Unregistered {} from world {}", user, world);
            }
        }
        self.worlds.remove_if(world, |_, users| users.is_empty());
        removed
    }

    /// Delivers `event` to every registered connection in `world`, except
    /// `exclude_user` when given.
    ///
    /// Deliveries run concurrently, each bounded by the registry's timeout;
    /// failed or timed-out deliveries are dropped per-recipient. Best-effort
    /// by design: returns the number of recipients reached and never
    /// surfaces an error to the caller.
    pub async fn broadcast(
        &self,
        world: &WorldId,
        event: ServerEvent,
        exclude_user: Option<&UserId>,
    ) -> usize {
        let targets: Vec<ConnectionHandle> = match self.worlds.get(world) {
            Some(users) => users
                .values()
                .filter(|h| exclude_user != Some(&h.user_id))
                .cloned()
                .collect(),
            None => return 0,
        };

        let timeout = self.send_timeout;
        let sends = targets.iter().map(|handle| {
            let event = event.clone();
            async move {
                let delivered = handle.send_timeout(event, timeout).await;
                if !delivered {
                    trace!("⏱️ Dropped delivery to {} (slow or gone)", handle.user_id);
                }
                delivered
            }
        });

        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }

    /// Best-effort delivery to a single user; silently a no-op when the user
    /// is not registered in `world`.
    pub async fn send_to_user(&self, world: &WorldId, user: &UserId, event: ServerEvent) -> bool {
        let handle = match self.worlds.get(world) {
            Some(users) => users.get(user).cloned(),
            None => None,
        };
        match handle {
            Some(handle) => handle.send_timeout(event, self.send_timeout).await,
            None => false,
        }
    }

    /// Snapshot of the registered (user id, username) pairs of a world.
    pub fn users(&self, world: &WorldId) -> Vec<(UserId, String)> {
        self.worlds
            .get(world)
            .map(|users| {
                let mut list: Vec<(UserId, String)> = users
                    .values()
                    .map(|h| (h.user_id.clone(), h.username.clone()))
                    .collect();
                list.sort();
                list
            })
            .unwrap_or_default()
    }

    /// Number of registered connections in a world.
    pub fn world_len(&self, world: &WorldId) -> usize {
        self.worlds.get(world).map(|u| u.len()).unwrap_or(0)
    }

    /// Total number of registered connections across all worlds.
    pub fn len(&self) -> usize {
        self.worlds.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Duration::from_millis(100))
    }

    fn connect(
        reg: &ConnectionRegistry,
        world: &str,
        user: &str,
    ) -> mpsc::Receiver<ServerEvent> {
        let (handle, rx) = ConnectionHandle::channel(user.to_string(), user.to_string(), 8);
        assert!(reg.register(&world.to_string(), &user.to_string(), handle).is_none());
        rx
    }

    fn probe() -> ServerEvent {
        ServerEvent::UserLeft { user_id: "x".into(), username: "x".into() }
    }

    #[tokio::test]
    async fn broadcast_excludes_sender_by_user_id() {
        let reg = registry();
        let world = "w1".to_string();
        let mut rx_a = connect(&reg, "w1", "a");
        let mut rx_b = connect(&reg, "w1", "b");

        let reached = reg.broadcast(&world, probe(), Some(&"a".to_string())).await;
        assert_eq!(reached, 1);
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_survives_a_stalled_peer() {
        let reg = registry();
        let world = "w1".to_string();

        // "stuck" has a full single-slot queue that is never drained
        let (stuck, _stuck_rx) =
            ConnectionHandle::channel("stuck".to_string(), "stuck".to_string(), 1);
        reg.register(&world, &"stuck".to_string(), stuck.clone());
        assert!(stuck.send_timeout(probe(), Duration::from_millis(10)).await);

        let mut rx_b = connect(&reg, "w1", "b");
        let mut rx_c = connect(&reg, "w1", "c");

        let reached = reg.broadcast(&world, probe(), None).await;
        assert_eq!(reached, 2);
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
    }

    #[tokio::test]
    async fn reconnect_replaces_instead_of_duplicating() {
        let reg = registry();
        let world = "w1".to_string();
        let user = "a".to_string();

        let (first, _rx1) = ConnectionHandle::channel(user.clone(), "ada".to_string(), 8);
        let first_session = first.session_id();
        assert!(reg.register(&world, &user, first).is_none());

        let (second, _rx2) = ConnectionHandle::channel(user.clone(), "ada".to_string(), 8);
        let second_session = second.session_id();
        let displaced = reg.register(&world, &user, second).expect("old handle displaced");
        assert_eq!(displaced.session_id(), first_session);
        assert_eq!(reg.world_len(&world), 1);

        // The displaced handler's cleanup must not remove the replacement
        assert!(!reg.unregister_exact(&world, &user, first_session));
        assert_eq!(reg.world_len(&world), 1);
        assert!(reg.unregister_exact(&world, &user, second_session));
        assert_eq!(reg.world_len(&world), 0);
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_drops_empty_worlds() {
        let reg = registry();
        let world = "w1".to_string();
        let _rx = connect(&reg, "w1", "a");

        reg.unregister(&world, &"a".to_string());
        reg.unregister(&world, &"a".to_string());
        assert!(reg.is_empty());
        assert_eq!(reg.users(&world), Vec::new());
    }

    #[tokio::test]
    async fn send_to_absent_user_is_a_silent_no_op() {
        let reg = registry();
        assert!(!reg.send_to_user(&"w1".to_string(), &"ghost".to_string(), probe()).await);
    }
}
