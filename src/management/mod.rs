//! Management control plane for read-only storage.
//!
//! [`ManagementHandler`] owns the operations behind the HTTP API:
//! reads go straight to [`ConfigState`]; mutations validate, update the
//! state, push it into the [`SyncScheduler`] and then write both the main
//! config and the side file. A write failure is reported, but the new value
//! stays in effect in memory.
//!
//! Mutating methods block (git status, file I/O); async callers run them on
//! the blocking pool.

pub mod auth;
pub mod body;
pub mod routes;

pub use auth::{AttemptTracker, AuthError, AuthGuard, AuthSettings, hash_secret};
pub use routes::router;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

use crate::config::{
    ConfigState, ReadOnlySettings, ServerConfig, load_config, persist_both, save_config,
};
use crate::sync::{Phase, SyncReport, SyncScheduler};

/// Smallest accepted sync interval, in minutes.
pub const MIN_SYNC_INTERVAL_MINUTES: i64 = 1;

/// Refusal message when read-only mode would discard local work.
pub const PENDING_CHANGES_MESSAGE: &str = "Cannot enable read-only mode while there are pending local changes. Please sync changes first.";

/// Errors returned by control-plane operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagementError {
    #[error("invalid body")]
    InvalidBody,

    #[error("{0}")]
    Validation(String),

    #[error("{}", PENDING_CHANGES_MESSAGE)]
    PendingLocalChanges,

    #[error("Cannot check for pending changes: {0}")]
    PendingCheck(String),

    /// The value was applied in memory but could not be written to disk.
    #[error("{message}")]
    Persist {
        field: &'static str,
        value: serde_json::Value,
        message: String,
    },

    #[error("{0}")]
    Internal(String),
}

impl ManagementError {
    pub fn status_code(&self) -> u16 {
        match self {
            ManagementError::InvalidBody
            | ManagementError::Validation(_)
            | ManagementError::PendingLocalChanges => 400,
            ManagementError::PendingCheck(_)
            | ManagementError::Persist { .. }
            | ManagementError::Internal(_) => 500,
        }
    }
}

/// State of the scheduler as reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerStatus {
    Running,
    Stopped,
    /// No git store is configured.
    Unavailable,
}

/// Body of `GET /v0/management/storage/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStatus {
    pub read_only: bool,
    pub sync_interval_minutes: i64,
    pub scheduler: SchedulerStatus,
    pub last_sync: Option<SyncReport>,
}

/// Control-plane operations over the shared read-only settings.
#[derive(Debug)]
pub struct ManagementHandler {
    state: Arc<ConfigState>,
    base_config: ServerConfig,
    config_path: PathBuf,
    side_file_path: PathBuf,
    scheduler: Option<SyncScheduler>,
    auth: AuthGuard,
    /// Serializes check-then-set sequences.
    mutation: Mutex<()>,
    /// Serializes disk writes.
    persist: Mutex<()>,
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ManagementHandler {
    /// `config` supplies everything but the two live settings, which always
    /// come from `state` when saving.
    pub fn new(
        state: Arc<ConfigState>,
        config: ServerConfig,
        config_path: impl Into<PathBuf>,
        scheduler: Option<SyncScheduler>,
        auth: AuthGuard,
    ) -> Self {
        let side_file_path = config.side_file_path();
        Self {
            state,
            base_config: config,
            config_path: config_path.into(),
            side_file_path,
            scheduler,
            auth,
            mutation: Mutex::new(()),
            persist: Mutex::new(()),
        }
    }

    pub fn auth(&self) -> &AuthGuard {
        &self.auth
    }

    pub fn state(&self) -> &Arc<ConfigState> {
        &self.state
    }

    pub fn scheduler(&self) -> Option<&SyncScheduler> {
        self.scheduler.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn side_file_path(&self) -> &Path {
        &self.side_file_path
    }

    pub fn get_read_only(&self) -> bool {
        self.state.is_read_only_storage()
    }

    pub fn get_sync_interval(&self) -> i64 {
        self.state.sync_interval_minutes()
    }

    pub fn status(&self) -> StorageStatus {
        let scheduler = match &self.scheduler {
            None => SchedulerStatus::Unavailable,
            Some(s) if s.phase() == Phase::Running => SchedulerStatus::Running,
            Some(_) => SchedulerStatus::Stopped,
        };
        StorageStatus {
            read_only: self.get_read_only(),
            sync_interval_minutes: self.get_sync_interval(),
            scheduler,
            last_sync: self.scheduler.as_ref().and_then(SyncScheduler::last_sync),
        }
    }

    /// Turn read-only mode on or off.
    ///
    /// Enabling is refused while the working copy has pending local changes,
    /// so a sync never discards unsaved work.
    pub fn set_read_only(&self, read_only: bool) -> Result<bool, ManagementError> {
        {
            let _guard = lock(&self.mutation);
            if read_only {
                self.ensure_can_enable_read_only()?;
            }

            let previous = self.state.is_read_only_storage();
            self.state.set_read_only_storage(read_only);
            self.push_to_scheduler();

            if previous != read_only {
                if read_only {
                    info!("Storage read-only mode enabled");
                } else {
                    info!("Storage read-only mode disabled");
                }
            }
        }

        self.persist("read_only", serde_json::Value::Bool(read_only))?;
        Ok(read_only)
    }

    /// Change the sync interval. `minutes` must be at least one.
    pub fn set_sync_interval(&self, minutes: i64) -> Result<i64, ManagementError> {
        if minutes < MIN_SYNC_INTERVAL_MINUTES {
            return Err(ManagementError::Validation(format!(
                "sync_interval_minutes must be at least {}",
                MIN_SYNC_INTERVAL_MINUTES
            )));
        }

        {
            let _guard = lock(&self.mutation);
            self.state.set_sync_interval_minutes(minutes);
            self.push_to_scheduler();
            info!(minutes, "Storage sync interval updated");
        }

        self.persist("sync_interval_minutes", serde_json::Value::from(minutes))?;
        Ok(minutes)
    }

    fn ensure_can_enable_read_only(&self) -> Result<(), ManagementError> {
        let Some(scheduler) = &self.scheduler else {
            return Ok(());
        };
        match scheduler.has_pending_local_changes() {
            Ok(false) => Ok(()),
            Ok(true) => Err(ManagementError::PendingLocalChanges),
            Err(e) => Err(ManagementError::PendingCheck(e.to_string())),
        }
    }

    fn push_to_scheduler(&self) {
        if let Some(scheduler) = &self.scheduler {
            if let Err(e) = scheduler.update_config(self.state.clone()) {
                warn!(error = %e, "Failed to update sync scheduler");
            }
        }
    }

    /// The config file as it is now, with the live settings filled in.
    ///
    /// Falls back to the startup config when the file cannot be read, so
    /// external edits to other nodes survive whenever possible.
    fn snapshot(&self) -> ServerConfig {
        let current = load_config(&self.config_path).unwrap_or_else(|e| {
            warn!(path = %self.config_path.display(), error = %e, "Using startup config for save");
            self.base_config.clone()
        });
        let minutes = self.state.sync_interval_minutes();
        ServerConfig {
            read_only_storage: self.state.is_read_only_storage(),
            sync_interval_minutes: (minutes > 0).then_some(minutes),
            ..current
        }
    }

    /// Write both stores, attempting each even when the other fails.
    fn persist(
        &self,
        field: &'static str,
        value: serde_json::Value,
    ) -> Result<(), ManagementError> {
        let _guard = lock(&self.persist);
        let snapshot = self.snapshot();
        let mut failures = Vec::new();

        if let Err(e) = save_config(&self.config_path, &snapshot) {
            error!(path = %self.config_path.display(), error = %e, "Failed to save config");
            failures.push(format!("failed to save config: {}", e));
        }
        if let Err(e) = persist_both(
            snapshot.read_only_storage,
            snapshot.sync_interval_minutes.unwrap_or(0),
            &self.side_file_path,
        ) {
            error!(path = %self.side_file_path.display(), error = %e, "Failed to save read-only storage file");
            failures.push(format!("failed to save read-only storage file: {}", e));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ManagementError::Persist {
                field,
                value,
                message: failures.join("; "),
            })
        }
    }
}
