//! File system watcher for the read-only storage side file.
//!
//! Watches the side file's directory rather than the file itself so that
//! delete-and-recreate replacements are still observed. Reloads go straight
//! into [`ConfigState`]; the scheduler picks them up on its next iteration.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::side_file::load_side_file;
use super::state::ConfigState;
use crate::{Error, Result};

/// Debounce duration - wait this long after last event before reloading
const DEBOUNCE_MS: u64 = 100;

/// Start watching the side file at `path`, reloading `state` on every write
/// or create of that exact file.
///
/// The watch is registered before this returns, so edits made afterwards are
/// never missed. The returned task runs until `cancel` fires and releases the
/// watch handle on exit. Reload failures are logged and never stop the loop.
pub fn start_side_file_watcher(
    state: Arc<ConfigState>,
    path: &Path,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("not a file path: {}", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let dir = dir.canonicalize()?;
    let target = dir.join(file_name);

    let (tx, rx) = mpsc::channel(100);
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        },
        Config::default(),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;

    info!(path = %target.display(), "Watching read-only storage file");

    Ok(tokio::spawn(watch_loop(state, watcher, rx, target, cancel)))
}

async fn watch_loop(
    state: Arc<ConfigState>,
    watcher: RecommendedWatcher,
    mut rx: mpsc::Receiver<notify::Result<Event>>,
    target: PathBuf,
    cancel: CancellationToken,
) {
    // Dropped when the loop exits, which removes the watch.
    let _watcher = watcher;

    let mut pending_reload = false;
    let mut last_event_time = Instant::now();

    loop {
        let timeout = if pending_reload {
            Duration::from_millis(DEBOUNCE_MS).saturating_sub(last_event_time.elapsed())
        } else {
            Duration::from_secs(3600)
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                info!(path = %target.display(), "Shutting down read-only storage watcher");
                break;
            }
            event = rx.recv() => {
                match event {
                    Some(Ok(event)) => {
                        if touches_file(&event, &target) {
                            debug!(kind = ?event.kind, "Read-only storage file changed");
                            pending_reload = true;
                            last_event_time = Instant::now();
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "File watcher error"),
                    None => break, // Channel closed
                }
            }
            _ = tokio::time::sleep(timeout), if pending_reload => {
                reload(&state, &target);
                pending_reload = false;
            }
        }
    }
}

/// Whether `event` is a write or create of exactly `target`.
fn touches_file(event: &Event, target: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| p == target)
}

fn reload(state: &ConfigState, path: &Path) {
    match load_side_file(state, path) {
        Ok(()) => info!(
            path = %path.display(),
            read_only = state.is_read_only_storage(),
            sync_interval_minutes = state.sync_interval_minutes(),
            "Read-only storage configuration reloaded"
        ),
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "Failed to reload read-only storage configuration"
        ),
    }
}
