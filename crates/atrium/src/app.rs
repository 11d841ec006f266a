//! Main application logic and lifecycle management.
//!
//! This module contains the core `Application` struct that orchestrates
//! server startup, the shutdown wait, and cleanup.

use crate::{cli::CliArgs, config::AppConfig, logging::display_banner, signals};
use presence_server::{MemoryFastStore, PresenceServer, SqliteDurableStore};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main application struct.
///
/// Manages the complete lifecycle of the presence server: configuration
/// loading, store wiring, server startup, and graceful shutdown handling.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Presence server instance
    server: Arc<PresenceServer>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating a default one if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate the merged configuration
    /// 4. Open the durable store and prepare its schema
    /// 5. Wire the presence server
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(database_url) = args.database_url {
            config.storage.database_url = database_url;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        // Durable store: SQLite, created on first run
        let options = SqliteConnectOptions::from_str(&config.storage.database_url)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let durable = Arc::new(SqliteDurableStore::new(pool).await?);
        info!("💾 Durable store ready at {}", config.storage.database_url);

        // Fast store: in-process shared state
        let fast = Arc::new(MemoryFastStore::new());

        let server_config = config.to_server_config()?;
        let server = Arc::new(PresenceServer::new(server_config, fast, durable));

        info!(
            "📂 Config: {} | Durable store: {}",
            args.config_path.display(),
            config.storage.database_url
        );

        Ok(Self { config, server })
    }

    /// Runs the application until a shutdown signal arrives.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting AtriumVerse Presence Server");
        info!(
            "🎮 Ready to accept connections on ws://{}/ws/{{world_id}}",
            self.config.server.bind_address
        );

        let server = self.server.clone();
        let server_handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("❌ Server error: {:?}", e);
                std::process::exit(1);
            }
        });

        signals::wait_for_shutdown().await?;

        self.server.shutdown();
        if tokio::time::timeout(std::time::Duration::from_secs(5), server_handle)
            .await
            .is_err()
        {
            warn!("⚠️ Server did not stop within 5s, exiting anyway");
        }

        info!("✅ Shutdown complete");
        Ok(())
    }
}
