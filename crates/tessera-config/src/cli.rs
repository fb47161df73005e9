//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::Config;

/// Which side of the replication link a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Run a server and a client in one process.
    Local,
    Server,
    Client,
}

/// tessera command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "tessera", about = "Server-authoritative object replication")]
pub struct CliArgs {
    #[arg(long, value_enum, default_value_t = Role::Local)]
    pub role: Role,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Server update interval in milliseconds.
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Number of ticks to simulate before exiting.
    #[arg(long, default_value_t = 100)]
    pub ticks: u32,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Save name to write to.
    #[arg(long)]
    pub save: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ms) = args.tick_ms {
            self.network.update_interval_ms = ms;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(ref save) = args.save {
            self.persistence.default_save = save.clone();
        }
    }
}
