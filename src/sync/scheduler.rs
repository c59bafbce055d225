//! Background sync scheduler.
//!
//! While read-only mode is active the loop pulls the remote immediately and
//! then once per interval. While it is inactive the loop idles, re-checking
//! the live [`ConfigState`] every second, so toggles made by the side file
//! watcher are picked up without a notification channel.
//!
//! ## States
//!
//! `Stopped` (initial) and `Running`. [`SyncScheduler::start`] on a running
//! scheduler stops the current loop first, so it doubles as a "kick". Each
//! start creates a fresh [`CancellationToken`]; a token is only ever
//! cancelled once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::pull::pull_from_remote;
use crate::config::ConfigState;
use crate::storage::Repository;
use crate::{Error, Result};

/// How often an idle loop re-checks the read-only flag.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Interval used when none (or a non-positive one) is configured.
pub const DEFAULT_SYNC_INTERVAL_MINUTES: i64 = 60;

/// Hook run after each successful sync, e.g. to reload credentials from disk.
pub type SyncHook = Arc<dyn Fn() -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Stopped,
    Running,
}

/// Outcome of the most recent sync attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub finished_at: DateTime<Utc>,
    /// Commit the working copy was reset to, on success.
    pub commit: Option<String>,
    /// Error message, on failure.
    pub error: Option<String>,
}

struct SchedulerState {
    phase: Phase,
    stop: CancellationToken,
    config: Option<Arc<ConfigState>>,
    on_sync_complete: Option<SyncHook>,
    last_sync: Option<SyncReport>,
}

struct Inner {
    repository: Arc<dyn Repository>,
    state: Mutex<SchedulerState>,
    loops_spawned: AtomicUsize,
    /// Length of one interval "minute" in milliseconds.
    minute_ms: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn interval_for(&self, minutes: i64) -> Duration {
        let minutes = if minutes <= 0 {
            DEFAULT_SYNC_INTERVAL_MINUTES
        } else {
            minutes
        };
        let minute = Duration::from_millis(self.minute_ms.load(Ordering::SeqCst));
        minute.saturating_mul(u32::try_from(minutes).unwrap_or(u32::MAX))
    }
}

/// Periodically pulls the remote while read-only mode is active.
///
/// Cheap to clone; clones share the same loop and state.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("phase", &self.phase())
            .field("loops_spawned", &self.loops_spawned())
            .finish()
    }
}

impl SyncScheduler {
    /// Create a stopped scheduler for `repository` with no configuration.
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                state: Mutex::new(SchedulerState {
                    phase: Phase::Stopped,
                    stop: CancellationToken::new(),
                    config: None,
                    on_sync_complete: None,
                    last_sync: None,
                }),
                loops_spawned: AtomicUsize::new(0),
                minute_ms: AtomicU64::new(60_000),
            }),
        }
    }

    /// Attach the live configuration without starting the loop.
    pub fn with_config(self, config: Arc<ConfigState>) -> Self {
        self.inner.lock().config = Some(config);
        self
    }

    /// Shrink the interval unit so interval behavior is observable in tests.
    #[cfg(test)]
    pub(crate) fn set_minute(&self, minute: Duration) {
        self.inner
            .minute_ms
            .store(minute.as_millis() as u64, Ordering::SeqCst);
    }

    /// Set (or clear) the hook run after each successful sync.
    pub fn set_on_sync_complete(&self, hook: Option<SyncHook>) {
        self.inner.lock().on_sync_complete = hook;
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Number of loop tasks launched so far.
    pub fn loops_spawned(&self) -> usize {
        self.inner.loops_spawned.load(Ordering::SeqCst)
    }

    pub fn last_sync(&self) -> Option<SyncReport> {
        self.inner.lock().last_sync.clone()
    }

    /// Start the loop, replacing a running one.
    ///
    /// Must be called from within a tokio runtime. Fails when no
    /// configuration is attached; a previously running loop is stopped either
    /// way.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Other(format!("sync scheduler needs a tokio runtime: {}", e)))?;

        let stop = {
            let mut state = self.inner.lock();
            if state.phase == Phase::Running {
                state.stop.cancel();
                state.stop = CancellationToken::new();
                state.phase = Phase::Stopped;
            }
            if state.config.is_none() {
                return Err(Error::NotConfigured("configuration"));
            }
            state.phase = Phase::Running;
            state.stop.clone()
        };

        self.inner.loops_spawned.fetch_add(1, Ordering::SeqCst);
        info!("Starting sync scheduler");
        runtime.spawn(run(self.clone(), stop));
        Ok(())
    }

    /// Stop the loop. No-op when already stopped.
    ///
    /// A sync already in flight runs to completion; only the wait between
    /// syncs is interrupted.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        if state.phase == Phase::Stopped {
            return;
        }
        state.stop.cancel();
        state.stop = CancellationToken::new();
        state.phase = Phase::Stopped;
        drop(state);

        info!("Sync scheduler stopped");
    }

    /// Replace the configuration and start or stop to match its read-only flag.
    ///
    /// Only a mismatch between the desired and the current phase triggers a
    /// transition.
    pub fn update_config(&self, config: Arc<ConfigState>) -> Result<()> {
        let should_run = config.is_read_only_storage();
        let is_running = {
            let mut state = self.inner.lock();
            state.config = Some(config);
            state.phase == Phase::Running
        };

        if should_run && !is_running {
            self.start()
        } else {
            if !should_run && is_running {
                self.stop();
            }
            Ok(())
        }
    }

    /// Whether the working copy holds changes a sync would discard.
    pub fn has_pending_local_changes(&self) -> Result<bool> {
        self.inner.repository.has_pending_local_changes()
    }

    /// Run one sync now. Blocking.
    ///
    /// Returns `Ok(None)` without touching the repository when read-only mode
    /// is inactive. The completion hook's failure is logged, never returned.
    pub fn sync(&self) -> Result<Option<String>> {
        let read_only = self
            .inner
            .lock()
            .config
            .as_ref()
            .is_some_and(|config| config.is_read_only_storage());
        if !read_only {
            info!("Read-only mode disabled, skipping sync");
            return Ok(None);
        }

        info!("Starting sync");
        let result = pull_from_remote(self.inner.repository.as_ref());

        let hook = {
            let mut state = self.inner.lock();
            state.last_sync = Some(SyncReport {
                finished_at: Utc::now(),
                commit: result.as_ref().ok().cloned(),
                error: result.as_ref().err().map(|e| e.to_string()),
            });
            state.on_sync_complete.clone()
        };

        let commit = result?;
        if let Some(hook) = hook {
            info!("Running sync completion hook");
            if let Err(e) = hook() {
                warn!(error = %e, "Sync completion hook failed");
            }
        }
        info!(commit = %commit, "Sync completed");
        Ok(Some(commit))
    }

    fn config(&self) -> Option<Arc<ConfigState>> {
        self.inner.lock().config.clone()
    }
}

async fn run(scheduler: SyncScheduler, stop: CancellationToken) {
    info!("Sync scheduler loop started");

    while !stop.is_cancelled() {
        let config = scheduler.config();
        let read_only = config
            .as_ref()
            .is_some_and(|config| config.is_read_only_storage());

        if !read_only {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(IDLE_POLL) => continue,
            }
        }

        let worker = scheduler.clone();
        match tokio::task::spawn_blocking(move || worker.sync()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(error = %e, "Sync failed"),
            Err(e) => error!(error = %e, "Sync task panicked"),
        }

        let minutes = config.map_or(0, |config| config.sync_interval_minutes());
        let interval = scheduler.inner.interval_for(minutes);
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Sync scheduler loop exited");
}
