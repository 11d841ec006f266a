//! Connection registry for live delivery.
//!
//! This module tracks every live connection per world and provides the
//! broadcast and personal-delivery primitives the session handlers build on.

pub mod handle;
pub mod manager;

pub use handle::ConnectionHandle;
pub use manager::ConnectionRegistry;

/// Nonce distinguishing successive connections of the same (world, user).
///
/// A reconnect replaces the registry entry; the displaced handler uses the
/// nonce to avoid tearing down its replacement's slot during cleanup.
pub type SessionId = uuid::Uuid;
