//! Command implementations for the rostore CLI.
//!
//! - `status` - Show the effective read-only storage settings
//! - `sync` - Pull the remote repository once, regardless of mode
//! - `hash_secret` - Hash a management secret for config.kdl

use serde::Serialize;
use std::path::Path;

use crate::config::{ConfigState, ValueSource, load_config, load_side_file, resolve_settings};
use crate::management::hash_secret as hash;
use crate::storage::{GitCliRepository, Repository};
use crate::sync::{DEFAULT_SYNC_INTERVAL_MINUTES, pull_from_remote};
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn to_json_string<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

/// Effective settings as the server would see them at startup.
#[derive(Debug, Serialize)]
pub struct StatusResult {
    pub read_only: bool,
    /// Where `read_only` came from: `side-file`, `env:READ_ONLY`, `config` or `default`.
    pub read_only_source: String,
    pub sync_interval_minutes: i64,
    pub sync_interval_source: String,
    /// Interval the scheduler would actually wait between syncs.
    pub effective_interval_minutes: i64,
    pub side_file: String,
    pub side_file_present: bool,
    /// Parse error of a malformed side file; read-only then falls back to `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side_file_error: Option<String>,
    pub git_store_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_dir: Option<String>,
    /// `None` when no working copy exists yet or the check failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_local_changes: Option<bool>,
}

impl Output for StatusResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let mode = if self.read_only { "read-only" } else { "writable" };
        let mut lines = vec![
            format!("Storage mode: {} ({})", mode, self.read_only_source),
            format!(
                "Sync interval: {} minutes ({})",
                self.effective_interval_minutes, self.sync_interval_source
            ),
            format!(
                "Side file: {}{}",
                self.side_file,
                if self.side_file_present { "" } else { " (missing)" }
            ),
        ];
        if let Some(error) = &self.side_file_error {
            lines.push(format!("Side file error: {}", error));
        }
        match &self.repository_dir {
            Some(dir) => lines.push(format!("Git store: {}", dir)),
            None => lines.push("Git store: not configured".to_string()),
        }
        if let Some(pending) = self.pending_local_changes {
            lines.push(format!(
                "Pending local changes: {}",
                if pending { "yes" } else { "no" }
            ));
        }
        lines.join("\n")
    }
}

/// Report the effective settings without changing anything on disk.
pub fn status(config_path: &Path) -> Result<StatusResult> {
    let config = load_config(config_path)?;
    let resolved = resolve_settings(&config);
    let state = ConfigState::new(
        resolved.read_only.value,
        resolved.sync_interval_minutes.value,
    );

    let side_file = config.side_file_path();
    let side_file_present = side_file.exists();
    let mut read_only_source = resolved.read_only.source.to_string();
    let mut sync_interval_source = resolved.sync_interval_minutes.source.to_string();
    let mut side_file_error = None;
    if side_file_present {
        side_file_error = load_side_file(&state, &side_file)
            .err()
            .map(|e| e.to_string());
        read_only_source = "side-file".to_string();
        if state.sync_interval_minutes() != resolved.sync_interval_minutes.value
            || resolved.sync_interval_minutes.source == ValueSource::Default
        {
            sync_interval_source = "side-file".to_string();
        }
    }

    let sync_interval_minutes = state.sync_interval_minutes();
    let effective_interval_minutes = if sync_interval_minutes > 0 {
        sync_interval_minutes
    } else {
        DEFAULT_SYNC_INTERVAL_MINUTES
    };

    let repository = GitCliRepository::from_config(&config);
    let pending_local_changes = repository
        .as_ref()
        .filter(|repo| repo.repository_dir().exists())
        .and_then(|repo| repo.has_pending_local_changes().ok());

    Ok(StatusResult {
        read_only: state.is_read_only_storage(),
        read_only_source,
        sync_interval_minutes,
        sync_interval_source,
        effective_interval_minutes,
        side_file: side_file.display().to_string(),
        side_file_present,
        side_file_error,
        git_store_configured: repository.is_some(),
        repository_dir: repository.map(|repo| repo.repository_dir().display().to_string()),
        pending_local_changes,
    })
}

#[derive(Debug, Serialize)]
pub struct SyncResult {
    pub commit: String,
    pub repository_dir: String,
}

impl Output for SyncResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Synced {} to {}", self.repository_dir, self.commit)
    }
}

/// Pull the configured repository once, discarding local changes.
pub fn sync(config_path: &Path) -> Result<SyncResult> {
    let config = load_config(config_path)?;
    let repository = GitCliRepository::from_config(&config).ok_or(Error::NotConfigured("git-store"))?;
    let commit = pull_from_remote(&repository)?;
    Ok(SyncResult {
        commit,
        repository_dir: repository.repository_dir().display().to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct HashSecretResult {
    pub secret_key: String,
}

impl Output for HashSecretResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        self.secret_key.clone()
    }
}

/// Hash `secret` for `remote-management { secret-key ... }`.
pub fn hash_secret(secret: &str) -> Result<HashSecretResult> {
    if secret.trim().is_empty() {
        return Err(Error::InvalidInput("secret must not be empty".to_string()));
    }
    Ok(HashSecretResult {
        secret_key: hash(secret),
    })
}
