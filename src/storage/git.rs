//! [`Repository`] backed by the `git` command line.
//!
//! Every call shells out to `git` in the working copy directory. Interactive
//! credential prompts are disabled; HTTP credentials are passed per command
//! as an extra header so they never land in `.git/config`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info};

use super::backend::{GitAuth, Repository};
use crate::config::ServerConfig;
use crate::{Error, Result};

/// Name of the authoritative remote.
pub const REMOTE_NAME: &str = "origin";

/// Git working copy driven through the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCliRepository {
    dir: PathBuf,
    remote_url: Option<String>,
    auth: Option<GitAuth>,
}

impl GitCliRepository {
    pub fn new(dir: impl Into<PathBuf>, remote_url: Option<String>, auth: Option<GitAuth>) -> Self {
        Self {
            dir: dir.into(),
            remote_url,
            auth,
        }
    }

    /// Build the repository described by `config`'s `git-store` block, if any.
    pub fn from_config(config: &ServerConfig) -> Option<Self> {
        let store = config.git_store.as_ref()?;
        let auth = match (&store.username, &store.token) {
            (Some(username), Some(token)) => Some(GitAuth::new(username, token)),
            _ => None,
        };
        Some(Self::new(
            config.repository_dir(),
            store.remote_url.clone(),
            auth,
        ))
    }

    fn check_dir(&self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "repository directory not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn command(&self, network: bool) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.dir).env("GIT_TERMINAL_PROMPT", "0");
        if network {
            if let Some(auth) = &self.auth {
                cmd.arg("-c")
                    .arg(format!("http.extraHeader={}", auth.basic_header()));
            }
        }
        cmd
    }

    fn output(&self, args: &[&str], network: bool) -> Result<Output> {
        self.command(network)
            .args(args)
            .output()
            .map_err(|e| Error::Other(format!("Failed to run git: {}", e)))
    }

    /// Run `git <args>` and return trimmed stdout, failing on a non-zero exit.
    fn run(&self, args: &[&str], network: bool) -> Result<String> {
        debug!(dir = %self.dir.display(), ?args, "Running git");
        let output = self.output(args, network)?;
        if !output.status.success() {
            return Err(Error::Git {
                command: args.first().copied().unwrap_or_default().to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Whether the directory is the top level of its own work tree.
    ///
    /// A directory nested inside some other repository does not count.
    fn is_work_tree(&self) -> bool {
        let Ok(dir) = self.dir.canonicalize() else {
            return false;
        };
        match self.output(&["rev-parse", "--show-toplevel"], false) {
            Ok(output) if output.status.success() => {
                let top = String::from_utf8_lossy(&output.stdout).trim().to_string();
                Path::new(&top).canonicalize().is_ok_and(|top| top == dir)
            }
            _ => false,
        }
    }

    fn configure_remote(&self, url: &str) -> Result<()> {
        let current = self.output(&["remote", "get-url", REMOTE_NAME], false)?;
        if !current.status.success() {
            self.run(&["remote", "add", REMOTE_NAME, url], false)?;
            info!(remote = REMOTE_NAME, url, "Added git remote");
        } else if String::from_utf8_lossy(&current.stdout).trim() != url {
            self.run(&["remote", "set-url", REMOTE_NAME, url], false)?;
            info!(remote = REMOTE_NAME, url, "Updated git remote URL");
        }
        Ok(())
    }

    /// Number of local commits not yet on the remote.
    ///
    /// Counts against the upstream branch when one is set. Working copies
    /// built by [`Repository::ensure_repository`] have no upstream, so
    /// otherwise every commit not reachable from an `origin` ref counts.
    /// An unborn `HEAD` counts as zero.
    fn commits_ahead(&self) -> Result<u64> {
        if self.resolve_reference("HEAD")?.is_none() {
            return Ok(0);
        }

        let upstream = self.output(&["rev-list", "--count", "@{u}..HEAD"], false)?;
        let count = if upstream.status.success() {
            String::from_utf8_lossy(&upstream.stdout).trim().to_string()
        } else {
            let remotes = format!("--remotes={}", REMOTE_NAME);
            self.run(&["rev-list", "--count", "HEAD", "--not", &remotes], false)?
        };
        count
            .parse()
            .map_err(|e| Error::Other(format!("unexpected rev-list output: {}", e)))
    }
}

impl Repository for GitCliRepository {
    fn ensure_repository(&self) -> Result<()> {
        self.check_dir()?;
        fs::create_dir_all(&self.dir)?;

        if !self.is_work_tree() {
            self.run(&["init"], false)?;
            info!(dir = %self.dir.display(), "Initialized git repository");
        }
        if let Some(url) = &self.remote_url {
            self.configure_remote(url)?;
        }
        Ok(())
    }

    fn repository_dir(&self) -> &Path {
        &self.dir
    }

    fn auth(&self) -> Option<&GitAuth> {
        self.auth.as_ref()
    }

    fn has_pending_local_changes(&self) -> Result<bool> {
        self.check_dir()?;
        if !self.is_work_tree() {
            return Ok(false);
        }

        let status = self.run(&["status", "--porcelain"], false)?;
        if !status.is_empty() {
            return Ok(true);
        }
        Ok(self.commits_ahead()? > 0)
    }

    fn fetch(&self, remote: &str, force: bool) -> Result<()> {
        let mut args = vec!["fetch"];
        if force {
            args.push("--force");
        }
        args.push(remote);
        self.run(&args, true)?;
        Ok(())
    }

    fn resolve_reference(&self, reference: &str) -> Result<Option<String>> {
        let spec = format!("{}^{{commit}}", reference);
        let output = self.output(&["rev-parse", "--verify", "--quiet", &spec], false)?;
        if !output.status.success() {
            return Ok(None);
        }
        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!commit.is_empty()).then_some(commit))
    }

    fn reset_hard(&self, commit: &str) -> Result<()> {
        self.run(&["reset", "--hard", commit], false)?;
        Ok(())
    }
}
