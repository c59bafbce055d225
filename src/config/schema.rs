//! KDL schema for config.kdl.
//!
//! This module provides:
//! - Rust structs representing the KDL schema
//! - Parsing from a KDL document
//! - A format-preserving patcher that writes values back into an existing document
//! - Validation and default values

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::side_file::SIDE_FILE_NAME;

/// Default listen host for the management server.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen port for the management server.
pub const DEFAULT_PORT: u16 = 8317;

/// Default data directory (holds the side file and the repository clone).
pub const DEFAULT_DATA_DIR: &str = "data";

/// Remote management access settings.
///
/// ```kdl
/// remote-management {
///     allow-remote #false
///     secret-key "sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteManagement {
    /// Whether non-loopback callers may use the management API at all
    pub allow_remote: bool,

    /// Hash of the management key (see `management::auth::hash_secret`)
    pub secret_key: Option<String>,
}

/// Git-backed store settings.
///
/// ```kdl
/// git-store {
///     remote-url "https://example.com/org/config.git"
///     directory "data/repo"
///     username "git"
///     token "ghp_xxxxxxxxxxxxxxxxxxxx"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitStoreConfig {
    /// URL of the authoritative remote (`origin`)
    pub remote_url: Option<String>,

    /// Local working copy (defaults to `<data-dir>/repo`)
    pub directory: Option<PathBuf>,

    /// Username for HTTP authentication
    pub username: Option<String>,

    /// Token or password for HTTP authentication (sensitive!)
    pub token: Option<String>,
}

/// Main server configuration stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// host "127.0.0.1"
/// port 8317
/// data-dir "data"
/// read-only-storage #true
/// sync-interval-minutes 30
/// remote-management { ... }
/// git-store { ... }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host/address the management server binds to
    pub host: String,

    /// Port the management server listens on
    pub port: u16,

    /// Directory for the side file and the default repository location
    pub data_dir: PathBuf,

    /// Durable copy of the read-only flag
    pub read_only_storage: bool,

    /// Durable copy of the sync interval (None = scheduler default)
    pub sync_interval_minutes: Option<i64>,

    /// Management API access control
    pub remote_management: RemoteManagement,

    /// Git store, if this deployment is backed by a repository
    pub git_store: Option<GitStoreConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            read_only_storage: false,
            sync_interval_minutes: None,
            remote_management: RemoteManagement::default(),
            git_store: None,
        }
    }
}

impl ServerConfig {
    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host must not be empty".to_string());
        }
        if let Some(minutes) = self.sync_interval_minutes {
            if minutes < 1 {
                return Err(format!(
                    "sync-interval-minutes must be at least 1, got {}",
                    minutes
                ));
            }
        }
        if let Some(git) = &self.git_store {
            if git.token.is_some() && git.username.is_none() {
                return Err("git-store token requires a username".to_string());
            }
        }
        Ok(())
    }

    /// Path of the read-only storage side file.
    pub fn side_file_path(&self) -> PathBuf {
        self.data_dir.join(SIDE_FILE_NAME)
    }

    /// Local working copy directory of the git store.
    pub fn repository_dir(&self) -> PathBuf {
        self.git_store
            .as_ref()
            .and_then(|git| git.directory.clone())
            .unwrap_or_else(|| self.data_dir.join("repo"))
    }

    /// Parse config from a KDL document.
    ///
    /// Missing nodes keep their defaults; nodes with a value of the wrong type
    /// are ignored. Unknown nodes are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::default();

        if let Some(host) = string_value(doc, "host") {
            config.host = host;
        }

        if let Some(port) = integer_value(doc, "port") {
            if let Ok(port) = u16::try_from(port) {
                config.port = port;
            }
        }

        if let Some(dir) = string_value(doc, "data-dir") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(read_only) = bool_value(doc, "read-only-storage") {
            config.read_only_storage = read_only;
        }

        if let Some(minutes) = integer_value(doc, "sync-interval-minutes") {
            config.sync_interval_minutes = i64::try_from(minutes).ok();
        }

        if let Some(children) = doc.get("remote-management").and_then(|n| n.children()) {
            if let Some(allow) = bool_value(children, "allow-remote") {
                config.remote_management.allow_remote = allow;
            }
            config.remote_management.secret_key =
                string_value(children, "secret-key").filter(|s| !s.trim().is_empty());
        }

        if let Some(children) = doc.get("git-store").and_then(|n| n.children()) {
            config.git_store = Some(GitStoreConfig {
                remote_url: string_value(children, "remote-url"),
                directory: string_value(children, "directory").map(PathBuf::from),
                username: string_value(children, "username"),
                token: string_value(children, "token"),
            });
        }

        config
    }

    /// Write this config into an existing KDL document.
    ///
    /// Existing nodes keep their position, comments and formatting; only their
    /// values are replaced, and only when they differ. Nodes the document lacks
    /// are appended. Returns `true` if any node was appended.
    pub fn apply_to_kdl(&self, doc: &mut KdlDocument) -> bool {
        let mut appended = false;

        appended |= set_value(doc, "host", KdlValue::String(self.host.clone()));
        appended |= set_value(doc, "port", KdlValue::Integer(self.port as i128));
        appended |= set_value(
            doc,
            "data-dir",
            KdlValue::String(self.data_dir.display().to_string()),
        );
        appended |= set_value(doc, "read-only-storage", KdlValue::Bool(self.read_only_storage));
        match self.sync_interval_minutes {
            Some(minutes) => {
                appended |= set_value(
                    doc,
                    "sync-interval-minutes",
                    KdlValue::Integer(minutes as i128),
                );
            }
            None => remove_node(doc, "sync-interval-minutes"),
        }

        let remote = child_document(doc, "remote-management", &mut appended);
        appended |= set_value(
            remote,
            "allow-remote",
            KdlValue::Bool(self.remote_management.allow_remote),
        );
        match &self.remote_management.secret_key {
            Some(key) => appended |= set_value(remote, "secret-key", KdlValue::String(key.clone())),
            None => remove_node(remote, "secret-key"),
        }

        if let Some(git) = &self.git_store {
            let store = child_document(doc, "git-store", &mut appended);
            let fields = [
                ("remote-url", git.remote_url.clone()),
                (
                    "directory",
                    git.directory.as_ref().map(|d| d.display().to_string()),
                ),
                ("username", git.username.clone()),
                ("token", git.token.clone()),
            ];
            for (name, value) in fields {
                match value {
                    Some(value) => appended |= set_value(store, name, KdlValue::String(value)),
                    None => remove_node(store, name),
                }
            }
        }

        appended
    }

    /// Convert config to a fresh KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();
        self.apply_to_kdl(&mut doc);
        doc.autoformat();
        doc
    }
}

fn first_value<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .map(|entry| entry.value())
}

fn string_value(doc: &KdlDocument, name: &str) -> Option<String> {
    first_value(doc, name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn integer_value(doc: &KdlDocument, name: &str) -> Option<i128> {
    first_value(doc, name).and_then(|v| v.as_integer())
}

fn bool_value(doc: &KdlDocument, name: &str) -> Option<bool> {
    first_value(doc, name).and_then(|v| v.as_bool())
}

/// Set the single value of node `name`, appending the node if absent.
fn set_value(doc: &mut KdlDocument, name: &str, value: KdlValue) -> bool {
    match doc.get_mut(name) {
        Some(node) => {
            let unchanged =
                node.entries().len() == 1 && node.entries()[0].value() == &value;
            if !unchanged {
                node.entries_mut().clear();
                node.push(KdlEntry::new(value));
            }
            false
        }
        None => {
            let mut node = KdlNode::new(name);
            node.push(KdlEntry::new(value));
            doc.nodes_mut().push(node);
            true
        }
    }
}

fn remove_node(doc: &mut KdlDocument, name: &str) {
    doc.nodes_mut().retain(|node| node.name().value() != name);
}

/// Children of node `name`, creating the node and its block if needed.
fn child_document<'a>(
    doc: &'a mut KdlDocument,
    name: &str,
    appended: &mut bool,
) -> &'a mut KdlDocument {
    let index = match doc.nodes().iter().position(|n| n.name().value() == name) {
        Some(index) => index,
        None => {
            doc.nodes_mut().push(KdlNode::new(name));
            *appended = true;
            doc.nodes().len() - 1
        }
    };
    let node = &mut doc.nodes_mut()[index];
    if node.children().is_none() {
        *appended = true;
    }
    node.ensure_children()
}
