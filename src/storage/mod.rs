//! Local working copy of the remote configuration repository.
//!
//! - [`Repository`] - the collaborator interface used by sync and management
//! - [`GitCliRepository`] - implementation that shells out to `git`

pub mod backend;
pub mod git;

pub use backend::{GitAuth, Repository};
pub use git::{GitCliRepository, REMOTE_NAME};
