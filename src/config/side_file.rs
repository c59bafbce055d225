//! The read-only storage side file.
//!
//! A small JSON document mirroring [`ConfigState`](super::ConfigState),
//! independent of the main configuration so the mode can be flipped without
//! rewriting or re-parsing config.kdl.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

use super::state::ReadOnlySettings;
use crate::Result;

/// File name of the side file inside the data directory.
pub const SIDE_FILE_NAME: &str = "read_only_storage.json";

/// Document written to an absent side file before the fields are applied.
const EMPTY_DOCUMENT: &str = r#"{"read_only": false}"#;

/// On-disk shape of the side file.
///
/// `sync_interval_minutes` is omitted when zero, meaning "no override".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOnlyStorageConfig {
    #[serde(default)]
    pub read_only: bool,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub sync_interval_minutes: i64,
}

fn is_zero(minutes: &i64) -> bool {
    *minutes == 0
}

/// Load the side file at `path` into `settings`.
///
/// - Missing file: read-only is reset to `false`, no error.
/// - Malformed file: read-only is reset to `false` and the parse error is
///   returned. Callers treat it as a warning.
/// - Valid file: `read_only` is adopted; `sync_interval_minutes` only when
///   positive, otherwise the current interval is kept.
pub fn load_side_file(settings: &dyn ReadOnlySettings, path: &Path) -> Result<()> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            settings.set_read_only_storage(false);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let document: ReadOnlyStorageConfig = match serde_json::from_str(&data) {
        Ok(document) => document,
        Err(e) => {
            settings.set_read_only_storage(false);
            return Err(e.into());
        }
    };

    settings.set_read_only_storage(document.read_only);
    if document.sync_interval_minutes > 0 {
        settings.set_sync_interval_minutes(document.sync_interval_minutes);
    }

    Ok(())
}

/// Write both settings to the side file at `path`.
///
/// An absent file starts from a minimal document; a malformed one is
/// replaced. The parent directory is created if needed. Output is indented
/// JSON so repeated writes produce identical bytes.
pub fn persist_both(read_only: bool, sync_interval_minutes: i64, path: &Path) -> Result<()> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => EMPTY_DOCUMENT.to_string(),
        Err(e) => return Err(e.into()),
    };

    let mut document: ReadOnlyStorageConfig = serde_json::from_str(&data).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Replacing malformed read-only storage file");
        ReadOnlyStorageConfig::default()
    });

    document.read_only = read_only;
    document.sync_interval_minutes = sync_interval_minutes;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut contents = serde_json::to_string_pretty(&document)?;
    contents.push('\n');
    fs::write(path, contents)?;

    Ok(())
}
