//! Runtime settings for tessera processes.
//!
//! Settings persist as `config.ron`, accept CLI overrides via clap, and can be
//! re-read to detect edits while a process runs. Unknown or missing fields
//! fall back to defaults so files survive version changes.

mod cli;
mod config;
mod error;

pub use cli::{CliArgs, Role};
pub use config::{
    CONFIG_FILE, Config, DebugConfig, NetworkConfig, PersistenceConfig, default_config_dir,
};
pub use error::ConfigError;
