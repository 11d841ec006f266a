//! Delivery handle for one live connection.
//!
//! The session handler owns the socket; the registry only ever holds this
//! handle, which feeds the session's bounded outbound queue. A handle going
//! away never races socket teardown, and a full queue is the backpressure
//! signal that lets broadcast skip a stalled peer.

use super::SessionId;
use crate::protocol::ServerEvent;
use crate::UserId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Non-owning delivery endpoint for a live connection.
///
/// Identified by the logical user id plus a session nonce; delivery and
/// exclusion work on the user id, never on handle identity, so they survive
/// reconnect races.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub user_id: UserId,
    pub username: String,
    session_id: SessionId,
    sender: mpsc::Sender<ServerEvent>,
    close: Arc<Notify>,
}

impl ConnectionHandle {
    /// Creates a handle and the receiving end of its outbound queue.
    pub fn channel(
        user_id: UserId,
        username: String,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            user_id,
            username,
            session_id: SessionId::new_v4(),
            sender,
            close: Arc::new(Notify::new()),
        };
        (handle, receiver)
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Queues an event for delivery, waiting up to `timeout` for queue
    /// space. Returns false when the budget elapsed or the session is gone.
    pub async fn send_timeout(&self, event: ServerEvent, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.sender.send(event)).await,
            Ok(Ok(()))
        )
    }

    /// Asks the owning session to terminate (used when a reconnect displaces
    /// this connection).
    pub fn request_close(&self) {
        self.close.notify_one();
    }

    /// Resolves when [`request_close`](Self::request_close) has been called.
    pub async fn close_requested(&self) {
        self.close.notified().await;
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
