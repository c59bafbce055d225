//! Configuration and read-only storage state for rostore.
//!
//! Two files carry the read-only settings:
//!
//! ## config.kdl - Main configuration (durable, user-edited)
//!
//! Contains listener settings, remote management credentials, the git store
//! and the `read-only-storage` / `sync-interval-minutes` nodes. Saved with
//! user formatting and comments preserved.
//!
//! ## read_only_storage.json - Side file (fast, machine-edited)
//!
//! Located at `<data-dir>/read_only_storage.json`:
//!
//! ```json
//! { "read_only": true, "sync_interval_minutes": 30 }
//! ```
//!
//! Watched for external edits and reloaded into [`ConfigState`] without a
//! restart. Every control-plane mutation writes both files.
//!
//! ## Precedence
//!
//! Lowest to highest: defaults, config.kdl, environment (`READ_ONLY`,
//! `SYNC_INTERVAL_MINUTES`), then the side file.
//!
//! Use the [`resolver`] module for environment resolution.

pub mod file;
pub mod resolver;
pub mod schema;
pub mod side_file;
pub mod state;
pub mod watcher;

pub use file::{load_config, save_config};
pub use resolver::{
    READ_ONLY_ENV, Resolved, ResolvedSettings, SYNC_INTERVAL_MINUTES_ENV, ValueSource,
    resolve_settings, resolve_settings_with_env,
};
pub use schema::{GitStoreConfig, RemoteManagement, ServerConfig};
pub use side_file::{ReadOnlyStorageConfig, SIDE_FILE_NAME, load_side_file, persist_both};
pub use state::{ConfigState, ReadOnlySettings};
pub use watcher::start_side_file_watcher;
