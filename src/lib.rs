//! rostore - read-only storage synchronization for git-backed configuration.
//!
//! This library provides the core of the `rostore` server: the read-only
//! storage settings and their side file, the scheduler that pulls the remote
//! repository while read-only mode is active, and the authenticated management
//! control plane that toggles both at runtime.

pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod management;
pub mod server;
pub mod storage;
pub mod sync;


/// Library-level error type for rostore operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Kdl(#[from] kdl::KdlError),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    /// A sync attempt failed at `stage`; the whole attempt is abandoned.
    #[error("failed to {stage}: {source}")]
    Sync {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} is not set")]
    NotConfigured(&'static str),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap `self` as a failed sync stage.
    pub fn at_stage(self, stage: &'static str) -> Self {
        Error::Sync {
            stage,
            source: Box::new(self),
        }
    }
}

/// Result type alias for rostore operations.
pub type Result<T> = std::result::Result<T, Error>;
