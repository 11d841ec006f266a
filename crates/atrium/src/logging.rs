//! Logging system setup and configuration.
//!
//! This module handles the initialization of the tracing-based logging
//! system with support for both human-readable and JSON output formats.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system with the specified configuration.
///
/// Sets up tracing-subscriber with appropriate formatting and filtering
/// based on the provided logging settings and CLI overrides. Respects
/// `RUST_LOG` when set.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        // JSON formatting with thread info for structured logging
        registry
            .with(fmt::layer()
                .json()
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(true)
                .with_thread_names(true)
            )
            .init();
    } else {
        // Human-readable formatting with thread info for development
        registry
            .with(fmt::layer()
                .with_ansi(true)
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(true)
                .with_thread_names(true)
            )
            .init();
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Displays the startup banner using proper logging.
pub fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║          🌌 ATRIUMVERSE SERVER 🌌        ║");
    info!("║            Presence Core v{}          ║", version);
    info!("║                                          ║");
    info!("║  Real-Time Presence & Spatial Chat       ║");
    info!("║  for Multi-Tenant Virtual Spaces         ║");
    info!("║                                          ║");
    info!("║  🗺️  Zone-Aware Movement                  ║");
    info!("║  📡 Best-Effort Broadcast Fan-Out        ║");
    info!("║  💾 Throttled Position Sync              ║");
    info!("║  🌐 WebSocket Transport                  ║");
    info!("║                                          ║");
    info!("╚══════════════════════════════════════════╝");
}
