//! Per-connection session handling.
//!
//! A session is the protocol state machine wired to one physical WebSocket:
//! it authenticates, establishes presence, runs the receive-then-dispatch
//! loop, and executes deterministic cleanup on termination.

pub mod handler;
pub mod sync;

pub use handler::{handle_session, Session};
pub use sync::PositionSync;

use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;
use crate::spatial::ZoneIndex;
use crate::store::{DurableStore, FastStore};
use crate::zones::ZoneLifecycle;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

/// Shared server components injected into every session handler.
///
/// Constructed once at process start and owned by the server core; sessions
/// receive an `Arc` and never touch process-global state.
pub struct SessionContext {
    pub config: ServerConfig,
    pub registry: ConnectionRegistry,
    pub zone_index: ZoneIndex,
    pub zones: ZoneLifecycle,
    pub fast: Arc<dyn FastStore>,
    pub durable: Arc<dyn DurableStore>,
    pub verifier: TokenVerifier,
    /// Live session count, for the connection ceiling
    pub active_sessions: AtomicUsize,
}

impl SessionContext {
    /// Wires the shared components for the given configuration and stores.
    pub fn new(
        config: ServerConfig,
        fast: Arc<dyn FastStore>,
        durable: Arc<dyn DurableStore>,
    ) -> Self {
        let verifier = TokenVerifier::new(&config.jwt_secret);
        let registry = ConnectionRegistry::new(config.broadcast_timeout());
        let zone_index = ZoneIndex::new(durable.clone(), config.zone_cache_capacity);
        Self {
            config,
            registry,
            zone_index,
            zones: ZoneLifecycle::new(),
            fast,
            durable,
            verifier,
            active_sessions: AtomicUsize::new(0),
        }
    }
}
