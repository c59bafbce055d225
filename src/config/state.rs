//! Process-wide read-only storage settings.
//!
//! [`ConfigState`] is the single in-process authority for the read-only flag
//! and the sync interval. Each field is independently atomic; there is no
//! cross-field snapshot, so callers needing a consistent pair must take their
//! own lock around both reads.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Setter half of the read-only settings.
///
/// Implemented by [`ConfigState`]; loading the side file only needs this.
pub trait ReadOnlySettings: Send + Sync {
    /// Set the read-only flag.
    fn set_read_only_storage(&self, read_only: bool);

    /// Set the sync interval in minutes.
    fn set_sync_interval_minutes(&self, minutes: i64);
}

/// Live read-only storage settings shared by the scheduler and the control plane.
#[derive(Debug, Default)]
pub struct ConfigState {
    read_only: AtomicBool,
    sync_interval_minutes: AtomicI64,
}

impl ConfigState {
    /// Create a state with the given initial values.
    ///
    /// A non-positive interval means "no override" and makes the scheduler
    /// fall back to its default.
    pub fn new(read_only: bool, sync_interval_minutes: i64) -> Self {
        Self {
            read_only: AtomicBool::new(read_only),
            sync_interval_minutes: AtomicI64::new(sync_interval_minutes),
        }
    }

    /// Whether read-only storage mode is active.
    pub fn is_read_only_storage(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Configured sync interval in minutes (0 when unset).
    pub fn sync_interval_minutes(&self) -> i64 {
        self.sync_interval_minutes.load(Ordering::SeqCst)
    }
}

impl ReadOnlySettings for ConfigState {
    fn set_read_only_storage(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn set_sync_interval_minutes(&self, minutes: i64) {
        self.sync_interval_minutes.store(minutes, Ordering::SeqCst);
    }
}
