//! Command-line interface handling for the AtriumVerse presence server.
//!
//! This module provides command-line argument parsing using the `clap` crate.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
///
/// Holds the options that can override configuration file settings or
/// provide runtime parameters.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for the durable store URL
    pub database_url: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    pub fn parse() -> Self {
        let matches = Command::new("AtriumVerse Presence Server")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Real-time presence and spatial interaction server for AtriumVerse worlds")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Path to the configuration file")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Bind address, e.g. 0.0.0.0:8000"),
            )
            .arg(
                Arg::new("database-url")
                    .long("database-url")
                    .value_name("URL")
                    .help("Durable store URL, e.g. sqlite://atrium.db"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level: trace, debug, info, warn, error"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .action(ArgAction::SetTrue)
                    .help("Emit logs as JSON"),
            )
            .get_matches();

        Self {
            config_path: PathBuf::from(
                matches.get_one::<String>("config").expect("has default"),
            ),
            bind_address: matches.get_one::<String>("bind").cloned(),
            database_url: matches.get_one::<String>("database-url").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}
