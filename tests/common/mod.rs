//! Common test utilities for rostore integration tests.
//!
//! Provides `TestEnv` for an isolated data directory and config file, plus
//! helpers for building throwaway git remotes.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use rostore::storage::{GitAuth, Repository};
pub use tempfile::TempDir;

/// Environment variables that change rostore's behavior and must not leak in
/// from the developer's shell.
const ISOLATED_VARS: [&str; 5] = [
    "READ_ONLY",
    "SYNC_INTERVAL_MINUTES",
    "MANAGEMENT_PASSWORD",
    "ROS_CONFIG",
    "ROS_LOCAL_PASSWORD",
];

/// A test environment with its own config.kdl and data directory.
pub struct TestEnv {
    pub root: TempDir,
}

impl TestEnv {
    /// Create an environment whose config.kdl only sets `data-dir`.
    pub fn new() -> Self {
        Self::with_config("")
    }

    /// Create an environment with `extra` appended to config.kdl.
    pub fn with_config(extra: &str) -> Self {
        let env = Self {
            root: TempDir::new().unwrap(),
        };
        env.write_config(extra);
        env
    }

    pub fn write_config(&self, extra: &str) {
        fs::create_dir_all(self.data_dir()).unwrap();
        fs::write(
            self.config_path(),
            format!("data-dir \"{}\"\n{}", self.data_dir().display(), extra),
        )
        .unwrap();
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.path().join("config.kdl")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.path().join("data")
    }

    pub fn side_file(&self) -> PathBuf {
        self.data_dir().join("read_only_storage.json")
    }

    pub fn read_config(&self) -> String {
        fs::read_to_string(self.config_path()).unwrap()
    }

    pub fn read_side_file(&self) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(self.side_file()).unwrap()).unwrap()
    }

    /// Get a Command for the rostore binary pointed at this environment.
    pub fn rostore(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_rostore"));
        cmd.current_dir(self.root.path());
        for var in ISOLATED_VARS {
            cmd.env_remove(var);
        }
        cmd.env("RUST_LOG", "off");
        cmd.arg("--config").arg(self.config_path());
        cmd
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `git <args>` in `dir`, returning trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare remote plus a working clone used to publish commits to it.
pub struct GitRemote {
    pub root: TempDir,
}

impl GitRemote {
    /// Create a bare remote whose `main` branch holds one commit.
    pub fn new() -> Self {
        let remote = Self {
            root: TempDir::new().unwrap(),
        };
        fs::create_dir_all(remote.bare()).unwrap();
        git(&remote.bare(), &["init", "--bare", "--initial-branch=main"]);

        fs::create_dir_all(remote.publisher()).unwrap();
        git(&remote.publisher(), &["init", "--initial-branch=main"]);
        git(&remote.publisher(), &["config", "user.email", "test@test.com"]);
        git(&remote.publisher(), &["config", "user.name", "Test"]);
        git(&remote.publisher(), &["remote", "add", "origin", remote.url().as_str()]);
        remote.publish("config.yaml", "port: 8317\n");
        remote
    }

    pub fn bare(&self) -> PathBuf {
        self.root.path().join("remote.git")
    }

    pub fn url(&self) -> String {
        self.bare().display().to_string()
    }

    fn publisher(&self) -> PathBuf {
        self.root.path().join("publisher")
    }

    /// Commit `content` to `file` and push it to `main`. Returns the commit.
    pub fn publish(&self, file: &str, content: &str) -> String {
        fs::write(self.publisher().join(file), content).unwrap();
        git(&self.publisher(), &["add", file]);
        git(&self.publisher(), &["commit", "-m", &format!("update {}", file)]);
        git(&self.publisher(), &["push", "origin", "main"]);
        git(&self.publisher(), &["rev-parse", "HEAD"])
    }
}

impl Default for GitRemote {
    fn default() -> Self {
        Self::new()
    }
}

/// Repository stand-in for API tests that only care about pending changes.
pub struct StubRepository {
    pub dir: PathBuf,
    pub pending: AtomicBool,
    pub resets: Mutex<Vec<String>>,
}

impl StubRepository {
    pub fn new() -> Self {
        Self {
            dir: PathBuf::from("/tmp/rostore-stub-repo"),
            pending: AtomicBool::new(false),
            resets: Mutex::new(Vec::new()),
        }
    }

    pub fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::SeqCst);
    }
}

impl Default for StubRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository for StubRepository {
    fn ensure_repository(&self) -> rostore::Result<()> {
        Ok(())
    }

    fn repository_dir(&self) -> &Path {
        &self.dir
    }

    fn auth(&self) -> Option<&GitAuth> {
        None
    }

    fn has_pending_local_changes(&self) -> rostore::Result<bool> {
        Ok(self.pending.load(Ordering::SeqCst))
    }

    fn fetch(&self, _remote: &str, _force: bool) -> rostore::Result<()> {
        Ok(())
    }

    fn resolve_reference(&self, reference: &str) -> rostore::Result<Option<String>> {
        Ok((reference == "refs/remotes/origin/main").then(|| "c0ffee".repeat(6) + "c0ff"))
    }

    fn reset_hard(&self, commit: &str) -> rostore::Result<()> {
        self.resets.lock().unwrap().push(commit.to_string());
        Ok(())
    }
}
