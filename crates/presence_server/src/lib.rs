//! # Presence Server - Real-Time Virtual Space Core
//!
//! The live backbone of an AtriumVerse deployment: WebSocket presence,
//! movement synchronization, and scoped message relay for many users moving
//! around the 2D map of a world.
//!
//! ## Architecture Overview
//!
//! * **Connection Registry** - world-partitioned map of live connections with
//!   best-effort broadcast fan-out and per-recipient delivery timeouts
//! * **Zone Index** - in-memory cache of each world's rectangular zones so
//!   containment checks on the movement hot path never touch a store
//! * **Zone Lifecycle** - ephemeral zone membership: a zone's live context is
//!   created by the first user to enter it and destroyed by the last to leave
//! * **Session Handler** - the per-connection protocol state machine, from
//!   token authentication through the dispatch loop to deterministic cleanup
//! * **Stores** - a fast volatile store for live position/online state and a
//!   durable store for resume-after-reconnect, reconciled under throttling
//!
//! ## Message Flow
//!
//! 1. Client connects to `/ws/{world_id}?token=...` and is authenticated
//! 2. The session resolves an initial position (durable record, spawn point,
//!    or fallback), seeds the fast store, and announces the join
//! 3. Inbound messages are dispatched by their `type` tag: movement, zone
//!    enter/exit, scoped chat, signaling relay, presence queries
//! 4. On disconnect the session unwinds registry, zone, and store state and
//!    persists the last known position
//!
//! ## Thread Safety
//!
//! Registry and zone-cache state is sharded per world via `dashmap`; zone
//! membership tables sit behind one async mutex; each connection owns its
//! socket and drains a bounded outbound queue, so a slow peer only ever
//! stalls itself.

pub use auth::{AuthenticatedUser, TokenVerifier};
pub use config::ServerConfig;
pub use error::{AuthError, ServerError, StoreError};
pub use registry::ConnectionRegistry;
pub use server::PresenceServer;
pub use spatial::ZoneIndex;
pub use store::{DurableStore, FastStore, MemoryDurableStore, MemoryFastStore, SqliteDurableStore};
pub use zones::ZoneLifecycle;

// Public module declarations
pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod spatial;
pub mod store;
pub mod zones;



/// Identifier of a world (tenant boundary). All registry, zone-cache, and
/// zone-lifecycle state is partitioned by this key.
pub type WorldId = String;

/// Identifier of a user, as carried in the bearer token's subject claim.
pub type UserId = String;

/// Identifier of a zone within a world's map.
pub type ZoneId = String;
