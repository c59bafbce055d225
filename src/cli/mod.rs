//! CLI argument definitions for rostore.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::server::DEFAULT_CONFIG_PATH;

/// rostore - read-only storage sync for a git-backed config store.
///
/// Start with `rostore serve` to run the management API and sync scheduler.
#[derive(Parser, Debug)]
#[command(name = "rostore")]
#[command(author, version, about = "Read-only storage sync and management API", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long = "log-json", global = true)]
    pub log_json: bool,

    /// Path to config.kdl
    #[arg(short = 'c', long = "config", global = true, env = "ROS_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config_path: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the management API and the sync scheduler
    Serve {
        /// Bind address (overrides `host` in config.kdl)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides `port` in config.kdl)
        #[arg(short, long)]
        port: Option<u16>,

        /// Password accepted from loopback callers only
        #[arg(long, env = "ROS_LOCAL_PASSWORD", hide_env_values = true)]
        local_password: Option<String>,
    },

    /// Show the effective read-only storage settings
    Status,

    /// Pull the remote repository once, discarding local changes
    Sync,

    /// Hash a management secret for `remote-management { secret-key ... }`
    HashSecret {
        /// Plaintext secret
        secret: String,
    },
}
