//! # AtriumVerse Presence Server - Main Entry Point
//!
//! Real-time presence and spatial-interaction server for AtriumVerse worlds.
//! This entry point handles CLI parsing, configuration loading, and
//! application lifecycle management.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! atrium
//!
//! # Specify custom configuration
//! atrium --config production.toml
//!
//! # Override specific settings
//! atrium --bind 0.0.0.0:8000 --log-level debug
//!
//! # JSON logging for production
//! atrium --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! The server shuts down gracefully on SIGINT (Ctrl+C) and, on Unix
//! systems, SIGTERM.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point for the AtriumVerse presence server.
///
/// Handles the complete application lifecycle:
/// 1. Command-line argument parsing
/// 2. Configuration loading and validation
/// 3. Logging system initialization
/// 4. Application creation and execution
/// 5. Error handling and cleanup
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments first
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    // Setup logging before anything else
    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    // Create and run application
    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export main types for potential library usage
pub use config::{AuthSettings, LoggingSettings, ServerSettings, StorageSettings};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let server_config = config
            .to_server_config()
            .expect("Default config should convert to ServerConfig");
        assert_eq!(server_config.max_connections, 1000);
        assert_eq!(server_config.spawn_fallback.x, 15.0);
    }

    #[tokio::test]
    async fn test_config_validation() {
        let mut config = AppConfig::default();

        // Invalid bind address
        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());

        // Invalid log level
        config.server.bind_address = "127.0.0.1:8000".to_string();
        config.logging.level = "whisper".to_string();
        assert!(config.validate().is_err());

        // Empty secret
        config.logging.level = "info".to_string();
        config.auth.jwt_secret = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let args = CliArgs {
            config_path: PathBuf::from("test.toml"),
            bind_address: Some("127.0.0.1:9000".to_string()),
            database_url: Some("sqlite::memory:".to_string()),
            log_level: Some("debug".to_string()),
            json_logs: true,
        };

        assert_eq!(args.config_path, PathBuf::from("test.toml"));
        assert_eq!(args.bind_address, Some("127.0.0.1:9000".to_string()));
        assert_eq!(args.log_level, Some("debug".to_string()));
        assert!(args.json_logs);
    }

    #[tokio::test]
    async fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");

        // First load writes the default file
        let written = AppConfig::load_from_file(&path).await.expect("create default");
        assert!(path.exists());

        // Second load reads it back unchanged
        let reread = AppConfig::load_from_file(&path).await.expect("reread");
        assert_eq!(written.server.bind_address, reread.server.bind_address);
        assert_eq!(written.auth.jwt_secret, reread.auth.jwt_secret);
    }
}
