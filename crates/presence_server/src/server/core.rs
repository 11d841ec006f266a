//! Core presence server implementation.
//!
//! This module contains the main `PresenceServer` struct, which owns the
//! shared components (connection registry, zone index, zone lifecycle,
//! stores, token verifier), accepts connections, and hands each one to a
//! session handler.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::session::{handle_session, SessionContext};
use crate::store::{DurableStore, FastStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

/// The core presence server structure.
///
/// All shared state is instantiated once here and injected into every
/// session handler; there are no process-global registries. The server runs
/// until [`shutdown`](Self::shutdown) is called or the accept loop fails.
pub struct PresenceServer {
    /// Shared components handed to every session
    context: Arc<SessionContext>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl PresenceServer {
    /// Creates a new presence server over the given stores.
    ///
    /// # Component Initialization
    ///
    /// 1. Builds the token verifier from the configured secret
    /// 2. Creates the connection registry with the broadcast delivery budget
    /// 3. Creates the zone index over the durable store
    /// 4. Creates the zone lifecycle tables
    pub fn new(
        config: ServerConfig,
        fast: Arc<dyn FastStore>,
        durable: Arc<dyn DurableStore>,
    ) -> Self {
        let context = Arc::new(SessionContext::new(config, fast, durable));
        let (shutdown_sender, _) = broadcast::channel(1);
        Self { context, shutdown_sender }
    }

    /// Starts the server and begins accepting connections.
    ///
    /// Binds the configured address and runs the accept loop until shutdown
    /// is requested or the listener fails.
    pub async fn start(&self) -> Result<(), ServerError> {
        let bind_address = self.context.config.bind_address;
        info!("🚀 Starting presence server on {}", bind_address);

        let listener = TcpListener::bind(bind_address)
            .await
            .map_err(|e| ServerError::Network(format!("bind failed on {bind_address}: {e}")))?;

        self.run(listener).await
    }

    /// Runs the accept loop over an already-bound listener.
    ///
    /// Split out from [`start`](Self::start) so callers (and tests) can bind
    /// an ephemeral port themselves.
    pub async fn run(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let context = self.context.clone();

                            // Spawn individual connection handler
                            tokio::spawn(async move {
                                if let Err(e) = handle_session(stream, addr, context).await {
                                    error!("Connection error from {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            break;
                        }
                    }
                }
                _ = shutdown_receiver.recv() => {
                    info!("Internal shutdown signal received");
                    break;
                }
            }
        }

        info!("Server stopped");
        Ok(())
    }

    /// Initiates server shutdown.
    ///
    /// Signals the accept loop to stop. Existing sessions run their own
    /// termination sequences as their sockets close.
    pub fn shutdown(&self) {
        info!("🛑 Shutting down server...");
        let _ = self.shutdown_sender.send(());
    }

    /// Shared components, exposed for wiring and tests.
    pub fn context(&self) -> Arc<SessionContext> {
        self.context.clone()
    }
}
