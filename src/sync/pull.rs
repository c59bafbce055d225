//! One-way pull: make the working copy exactly match the remote.
//!
//! Fetch then hard reset. A merge-style pull would keep local drift, which is
//! exactly what read-only mode must not do.

use tracing::info;

use crate::storage::{REMOTE_NAME, Repository};
use crate::{Error, Result};

/// Remote refs tried, in order, to find the remote's default branch.
pub const REMOTE_REFS: [&str; 3] = [
    "refs/remotes/origin/HEAD",
    "refs/remotes/origin/main",
    "refs/remotes/origin/master",
];

/// Pull the remote into `repository`, discarding local changes.
///
/// Returns the commit the working copy was reset to. Any failure is returned
/// as a single [`Error::Sync`] naming the stage that failed.
pub fn pull_from_remote(repository: &dyn Repository) -> Result<String> {
    repository
        .ensure_repository()
        .map_err(|e| e.at_stage("ensure repository"))?;

    let dir = repository.repository_dir();
    if dir.as_os_str().is_empty() {
        return Err(
            Error::InvalidConfig("repository directory not configured".to_string())
                .at_stage("pull changes"),
        );
    }
    info!(dir = %dir.display(), "Syncing from remote");

    repository
        .fetch(REMOTE_NAME, true)
        .map_err(|e| e.at_stage("fetch changes"))?;

    let commit = resolve_remote_head(repository)?;
    info!(commit = %short(&commit), "Resetting to remote commit");

    repository
        .reset_hard(&commit)
        .map_err(|e| e.at_stage("reset to remote"))?;

    info!(commit = %short(&commit), "Synced with remote (hard reset)");
    Ok(commit)
}

fn resolve_remote_head(repository: &dyn Repository) -> Result<String> {
    for reference in REMOTE_REFS {
        let resolved = repository
            .resolve_reference(reference)
            .map_err(|e| e.at_stage("find remote branch reference"))?;
        if let Some(commit) = resolved {
            return Ok(commit);
        }
    }
    Err(Error::Other(format!("none of {} exist", REMOTE_REFS.join(", ")))
        .at_stage("find remote branch reference"))
}

fn short(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}
