//! Repository collaborator trait.
//!
//! The sync loop and the control plane only talk to the local working copy
//! through [`Repository`], so either can be driven by an in-memory fake.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use std::path::Path;

use crate::Result;

/// HTTP credentials for the remote.
#[derive(Clone, PartialEq, Eq)]
pub struct GitAuth {
    pub username: String,
    pub token: String,
}

impl GitAuth {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }

    /// Value for an `Authorization` header using HTTP Basic auth.
    pub fn basic_header(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.token));
        format!("Authorization: Basic {}", encoded)
    }
}

impl fmt::Debug for GitAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitAuth")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// The local working copy of the remote configuration repository.
///
/// All operations are blocking and may touch the network; async callers run
/// them on the blocking pool.
pub trait Repository: Send + Sync {
    /// Make sure the working copy exists, is initialized and knows its remote.
    fn ensure_repository(&self) -> Result<()>;

    /// Directory holding the working copy.
    fn repository_dir(&self) -> &Path;

    /// Credentials used for network operations, if any.
    fn auth(&self) -> Option<&GitAuth>;

    /// Whether the working copy holds uncommitted or unpushed changes that a
    /// hard reset would discard.
    fn has_pending_local_changes(&self) -> Result<bool>;

    /// Fetch `remote`, overwriting local remote-tracking refs when `force`.
    fn fetch(&self, remote: &str, force: bool) -> Result<()>;

    /// Resolve `reference` to a commit id, or `None` when it does not exist.
    fn resolve_reference(&self, reference: &str) -> Result<Option<String>>;

    /// Reset the working copy and index to `commit`, discarding local edits.
    fn reset_hard(&self, commit: &str) -> Result<()>;
}
