//! Position synchronization between the fast and durable stores.
//!
//! Movement updates land in the fast store immediately; the durable store is
//! written on a throttle so a flood of movement messages cannot amplify into
//! a flood of database writes. A per-session autosave task provides a
//! fallback cadence independent of movement, and termination forces one
//! final unconditional write. The autosave task is owned by the session and
//! must be cancelled during termination; an escaped task would keep
//! re-saving stale positions after the user reconnects elsewhere.

use crate::store::DurableStore;
use crate::{UserId, WorldId};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Tracks a session's last known position and mediates durable writes.
pub struct PositionSync {
    world: WorldId,
    user: UserId,
    durable: Arc<dyn DurableStore>,
    position: watch::Sender<(f64, f64)>,
    min_interval: Duration,
    last_persist: Mutex<Instant>,
    autosave: Mutex<Option<JoinHandle<()>>>,
}

impl PositionSync {
    /// Creates the sync state seeded with the session's initial position.
    ///
    /// The throttle starts open: the first movement after connect persists
    /// immediately, subsequent writes wait out `min_interval`.
    pub fn new(
        world: WorldId,
        user: UserId,
        durable: Arc<dyn DurableStore>,
        initial: (f64, f64),
        min_interval: Duration,
    ) -> Self {
        let (position, _) = watch::channel(initial);
        let open = Instant::now()
            .checked_sub(min_interval)
            .unwrap_or_else(Instant::now);
        Self {
            world,
            user,
            durable,
            position,
            min_interval,
            last_persist: Mutex::new(open),
            autosave: Mutex::new(None),
        }
    }

    /// Records a new position without touching any store.
    pub fn record(&self, x: f64, y: f64) {
        self.position.send_replace((x, y));
    }

    /// The last recorded position.
    pub fn position(&self) -> (f64, f64) {
        *self.position.borrow()
    }

    /// Persists the current position durably, unless a write happened within
    /// the throttle interval. Returns true when a write was attempted.
    ///
    /// A failed write is logged and retried no sooner than the next
    /// interval; it is never surfaced to the client.
    pub async fn maybe_persist(&self) -> bool {
        {
            let mut last = self.last_persist.lock().expect("throttle clock poisoned");
            if last.elapsed() < self.min_interval {
                return false;
            }
            *last = Instant::now();
        }

        let (x, y) = self.position();
        if let Err(e) = self.durable.save_position(&self.world, &self.user, x, y).await {
            warn!("⚠️ Throttled position save failed for {}: {}", self.user, e);
        }
        true
    }

    /// Starts the fallback autosave task, re-saving the last known position
    /// every `interval` regardless of movement throttling.
    pub fn spawn_autosave(&self, interval: Duration) {
        let world = self.world.clone();
        let user = self.user.clone();
        let durable = self.durable.clone();
        let position = self.position.subscribe();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; presence establishment
            // already seeded the stores, so skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (x, y) = *position.borrow();
                if let Err(e) = durable.save_position(&world, &user, x, y).await {
                    warn!("⚠️ Autosave failed for {}: {}", user, e);
                }
            }
        });

        let mut slot = self.autosave.lock().expect("autosave slot poisoned");
        if let Some(old) = slot.replace(task) {
            old.abort();
        }
    }

    /// Cancels the autosave task. Safe to call repeatedly.
    pub fn cancel_autosave(&self) {
        if let Some(task) = self.autosave.lock().expect("autosave slot poisoned").take() {
            task.abort();
            debug!("🛑 Autosave cancelled for {}", self.user);
        }
    }

    /// One final unconditional durable write of the last known position,
    /// regardless of throttle state. Failures are logged only; termination
    /// must carry on to the remaining cleanup steps.
    pub async fn final_flush(&self) {
        let (x, y) = self.position();
        if let Err(e) = self.durable.save_position(&self.world, &self.user, x, y).await {
            warn!("⚠️ Final position save failed for {}: {}", self.user, e);
        }
    }
}

impl Drop for PositionSync {
    fn drop(&mut self) {
        // Backstop: a session that never reached finalize still must not
        // leak its autosave task.
        if let Ok(mut slot) = self.autosave.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDurableStore;

    fn sync_with(
        store: Arc<MemoryDurableStore>,
        min_interval: Duration,
    ) -> PositionSync {
        PositionSync::new(
            "w1".to_string(),
            "u1".to_string(),
            store,
            (15.0, 15.0),
            min_interval,
        )
    }

    #[tokio::test]
    async fn flood_of_moves_persists_once_per_interval() {
        let store = Arc::new(MemoryDurableStore::new());
        let sync = sync_with(store.clone(), Duration::from_secs(60));

        let mut writes = 0;
        for i in 0..50 {
            sync.record(i as f64, 0.0);
            if sync.maybe_persist().await {
                writes += 1;
            }
        }
        assert_eq!(writes, 1);

        let saved = store
            .load_position(&"w1".to_string(), &"u1".to_string())
            .await
            .unwrap()
            .expect("one write landed");
        // The throttle opened on the first move
        assert_eq!(saved.x, 0.0);
    }

    #[tokio::test]
    async fn final_flush_ignores_the_throttle() {
        let store = Arc::new(MemoryDurableStore::new());
        let sync = sync_with(store.clone(), Duration::from_secs(60));

        sync.record(1.0, 1.0);
        assert!(sync.maybe_persist().await);
        sync.record(40.0, 12.0);
        assert!(!sync.maybe_persist().await);

        sync.final_flush().await;
        let saved = store
            .load_position(&"w1".to_string(), &"u1".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((saved.x, saved.y), (40.0, 12.0));
    }

    #[tokio::test]
    async fn autosave_writes_without_movement() {
        let store = Arc::new(MemoryDurableStore::new());
        let sync = sync_with(store.clone(), Duration::from_secs(60));
        sync.record(7.0, 8.0);

        sync.spawn_autosave(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(90)).await;
        sync.cancel_autosave();

        let saved = store
            .load_position(&"w1".to_string(), &"u1".to_string())
            .await
            .unwrap()
            .expect("autosave landed");
        assert_eq!((saved.x, saved.y), (7.0, 8.0));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let store = Arc::new(MemoryDurableStore::new());
        let sync = sync_with(store, Duration::from_secs(60));
        sync.spawn_autosave(Duration::from_secs(60));
        sync.cancel_autosave();
        sync.cancel_autosave();
    }
}
