//! Read-only sync: pulling the remote over the local working copy.

pub mod pull;
pub mod scheduler;

pub use pull::{REMOTE_REFS, pull_from_remote};
pub use scheduler::{DEFAULT_SYNC_INTERVAL_MINUTES, Phase, SyncHook, SyncReport, SyncScheduler};
