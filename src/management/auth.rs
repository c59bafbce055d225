//! Authentication and brute-force protection for the management API.
//!
//! ## Credentials, checked in order
//!
//! 1. Local password (`--local-password`), loopback callers only
//! 2. `MANAGEMENT_PASSWORD` environment secret
//! 3. `remote-management.secret-key` hash (`sha256:<hex>`)
//!
//! Non-loopback callers additionally need remote management to be allowed,
//! and their failed attempts are counted per address. Five failures ban the
//! address for thirty minutes; while banned it is refused before credentials
//! are looked at.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::RemoteManagement;

/// Environment variable holding the management secret.
pub const MANAGEMENT_PASSWORD_ENV: &str = "MANAGEMENT_PASSWORD";

/// Failed attempts before an address is banned.
pub const MAX_FAILURES: u32 = 5;

/// How long a ban lasts.
pub const BAN_DURATION: Duration = Duration::from_secs(30 * 60);

/// Upper bound on tracked caller addresses.
pub const MAX_TRACKED_CALLERS: usize = 4096;

/// Prefix of stored secret hashes.
pub const SECRET_HASH_PREFIX: &str = "sha256:";

/// Hash `secret` for the `secret-key` config node.
pub fn hash_secret(secret: &str) -> String {
    format!("{}{:x}", SECRET_HASH_PREFIX, Sha256::digest(secret.as_bytes()))
}

/// Check `provided` against a stored hash, prefix optional, in constant time.
pub fn verify_secret_hash(provided: &str, stored: &str) -> bool {
    let stored = stored.trim();
    let stored = stored.strip_prefix(SECRET_HASH_PREFIX).unwrap_or(stored);
    let expected = stored.to_ascii_lowercase();
    let actual = format!("{:x}", Sha256::digest(provided.as_bytes()));
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn secrets_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Whether `ip` is a loopback address, including IPv4-mapped IPv6 loopback.
pub fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

/// Format a remaining ban like `29m59s`, rounded to the second.
pub fn format_remaining(remaining: Duration) -> String {
    let secs = (remaining.as_millis() + 500) / 1000;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn remaining(duration: &Duration) -> String {
    format_remaining(*duration)
}

/// Reasons a management request is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("IP banned due to too many failed attempts. Try again in {}", remaining(.0))]
    Banned(Duration),

    #[error("remote management disabled")]
    RemoteDisabled,

    #[error("remote management key not set")]
    KeyNotSet,

    #[error("missing management key")]
    MissingKey,

    #[error("invalid management key")]
    InvalidKey,
}

impl AuthError {
    /// 403 rather than 401: the caller may not try at all right now.
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            AuthError::Banned(_) | AuthError::RemoteDisabled | AuthError::KeyNotSet
        )
    }
}

/// Credentials accepted by the management API.
#[derive(Clone, Default)]
pub struct AuthSettings {
    pub allow_remote: bool,
    pub secret_hash: Option<String>,
    pub env_secret: Option<String>,
    pub local_password: Option<String>,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("allow_remote", &self.allow_remote)
            .field("secret_hash", &self.secret_hash.is_some())
            .field("env_secret", &self.env_secret.is_some())
            .field("local_password", &self.local_password.is_some())
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AuthSettings {
    /// Build settings from config plus the already-read env secret.
    ///
    /// Blank values count as unset.
    pub fn new(
        remote: &RemoteManagement,
        env_secret: Option<String>,
        local_password: Option<String>,
    ) -> Self {
        Self {
            allow_remote: remote.allow_remote,
            secret_hash: non_empty(remote.secret_key.clone()),
            env_secret: non_empty(env_secret),
            local_password: non_empty(local_password),
        }
    }

    /// Like [`AuthSettings::new`], reading `MANAGEMENT_PASSWORD` from the environment.
    pub fn from_env(remote: &RemoteManagement, local_password: Option<String>) -> Self {
        Self::new(
            remote,
            std::env::var(MANAGEMENT_PASSWORD_ENV).ok(),
            local_password,
        )
    }

    /// An environment secret always enables remote access.
    pub fn remote_allowed(&self) -> bool {
        self.allow_remote || self.env_secret.is_some()
    }

    fn has_secret(&self) -> bool {
        self.secret_hash.is_some() || self.env_secret.is_some()
    }
}

#[derive(Debug, Clone)]
struct AttemptRecord {
    failures: u32,
    banned_until: Option<Instant>,
    last_seen: Instant,
}

/// Per-address failure counters with a fixed capacity.
///
/// When full, recording a new address evicts the least recently seen one.
#[derive(Debug)]
pub struct AttemptTracker {
    records: Mutex<HashMap<IpAddr, AttemptRecord>>,
    capacity: usize,
}

impl Default for AttemptTracker {
    fn default() -> Self {
        Self::new(MAX_TRACKED_CALLERS)
    }
}

impl AttemptTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, AttemptRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse `ip` while it is banned. An expired ban is cleared.
    pub fn check(&self, ip: IpAddr, now: Instant) -> Result<(), AuthError> {
        let mut records = self.lock();
        if let Some(record) = records.get_mut(&ip) {
            if let Some(until) = record.banned_until {
                if now < until {
                    return Err(AuthError::Banned(until - now));
                }
                record.banned_until = None;
                record.failures = 0;
            }
        }
        Ok(())
    }

    /// Count a failed attempt, banning `ip` once it reaches the threshold.
    pub fn record_failure(&self, ip: IpAddr, now: Instant) {
        let mut records = self.lock();
        if !records.contains_key(&ip) && records.len() >= self.capacity {
            let oldest = records
                .iter()
                .min_by_key(|(_, record)| record.last_seen)
                .map(|(ip, _)| *ip);
            if let Some(oldest) = oldest {
                records.remove(&oldest);
            }
        }

        let record = records.entry(ip).or_insert(AttemptRecord {
            failures: 0,
            banned_until: None,
            last_seen: now,
        });
        record.last_seen = now;
        record.failures += 1;
        if record.failures >= MAX_FAILURES {
            record.banned_until = Some(now + BAN_DURATION);
            record.failures = 0;
            warn!(ip = %ip, "Banning management caller after repeated failures");
        }
    }

    /// Forget everything about `ip`.
    pub fn record_success(&self, ip: IpAddr) {
        self.lock().remove(&ip);
    }

    /// Current failure count for `ip`.
    pub fn failures(&self, ip: IpAddr) -> u32 {
        self.lock().get(&ip).map_or(0, |record| record.failures)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Decides whether a management request may proceed.
#[derive(Debug, Default)]
pub struct AuthGuard {
    settings: AuthSettings,
    attempts: AttemptTracker,
}

impl AuthGuard {
    pub fn new(settings: AuthSettings) -> Self {
        Self {
            settings,
            attempts: AttemptTracker::default(),
        }
    }

    pub fn with_tracker(settings: AuthSettings, attempts: AttemptTracker) -> Self {
        Self { settings, attempts }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn attempts(&self) -> &AttemptTracker {
        &self.attempts
    }

    /// Authorize a request from `peer` carrying `provided` as its key.
    pub fn authorize(&self, peer: IpAddr, provided: Option<&str>) -> Result<(), AuthError> {
        self.authorize_at(peer, provided, Instant::now())
    }

    /// [`AuthGuard::authorize`] with an explicit clock.
    pub fn authorize_at(
        &self,
        peer: IpAddr,
        provided: Option<&str>,
        now: Instant,
    ) -> Result<(), AuthError> {
        let local = is_local(peer);
        if !local {
            self.attempts.check(peer, now)?;
            if !self.settings.remote_allowed() {
                return Err(AuthError::RemoteDisabled);
            }
        }

        let local_password = self.settings.local_password.as_deref().filter(|_| local);
        if !self.settings.has_secret() && local_password.is_none() {
            return Err(AuthError::KeyNotSet);
        }

        let fail = |error: AuthError| {
            if !local {
                self.attempts.record_failure(peer, now);
            }
            Err(error)
        };

        let Some(provided) = provided.filter(|key| !key.is_empty()) else {
            return fail(AuthError::MissingKey);
        };

        let accepted = local_password.is_some_and(|password| secrets_match(provided, password))
            || self
                .settings
                .env_secret
                .as_deref()
                .is_some_and(|secret| secrets_match(provided, secret))
            || self
                .settings
                .secret_hash
                .as_deref()
                .is_some_and(|hash| verify_secret_hash(provided, hash));

        if !accepted {
            return fail(AuthError::InvalidKey);
        }
        if !local {
            self.attempts.record_success(peer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    const REMOTE: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn guard(allow_remote: bool, secret: &str) -> AuthGuard {
        AuthGuard::new(AuthSettings {
            allow_remote,
            secret_hash: Some(hash_secret(secret)),
            ..Default::default()
        })
    }

    #[test]
    fn test_hash_secret_format() {
        // sha256("secret")
        assert_eq!(
            hash_secret("secret"),
            "sha256:2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
    }

    #[test]
    fn test_verify_secret_hash() {
        let stored = hash_secret("hunter2");
        assert!(verify_secret_hash("hunter2", &stored));
        assert!(verify_secret_hash("hunter2", stored.trim_start_matches("sha256:")));
        assert!(verify_secret_hash("hunter2", &stored.to_uppercase().replace("SHA256:", "")));
        assert!(!verify_secret_hash("hunter3", &stored));
        assert!(!verify_secret_hash("hunter2", "sha256:abc"));
    }

    #[test]
    fn test_is_local() {
        assert!(is_local(LOCAL));
        assert!(is_local(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_local("::ffff:127.0.0.1".parse().unwrap()));
        assert!(!is_local(REMOTE));
        assert!(!is_local("::ffff:10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::from_secs(1799)), "29m59s");
        assert_eq!(format_remaining(Duration::from_millis(44_600)), "45s");
        assert_eq!(format_remaining(Duration::from_secs(3600)), "1h0m0s");
    }

    #[test]
    fn test_status_classes() {
        assert!(AuthError::Banned(Duration::from_secs(1)).is_forbidden());
        assert!(AuthError::RemoteDisabled.is_forbidden());
        assert!(AuthError::KeyNotSet.is_forbidden());
        assert!(!AuthError::MissingKey.is_forbidden());
        assert!(!AuthError::InvalidKey.is_forbidden());
    }

    #[test]
    fn test_local_caller_with_secret() {
        let guard = guard(false, "s3cret");
        assert_eq!(guard.authorize(LOCAL, Some("s3cret")), Ok(()));
        assert_eq!(guard.authorize(LOCAL, Some("wrong")), Err(AuthError::InvalidKey));
        assert_eq!(guard.authorize(LOCAL, None), Err(AuthError::MissingKey));
        // Local failures are never counted.
        assert!(guard.attempts().is_empty());
    }

    #[test]
    fn test_remote_refused_when_not_allowed() {
        let guard = guard(false, "s3cret");
        assert_eq!(
            guard.authorize(REMOTE, Some("s3cret")),
            Err(AuthError::RemoteDisabled)
        );
    }

    #[test]
    fn test_key_not_set() {
        let guard = AuthGuard::new(AuthSettings {
            allow_remote: true,
            ..Default::default()
        });
        assert_eq!(guard.authorize(LOCAL, Some("x")), Err(AuthError::KeyNotSet));
        assert_eq!(guard.authorize(REMOTE, Some("x")), Err(AuthError::KeyNotSet));
    }

    #[test]
    fn test_env_secret_enables_remote_access() {
        let settings = AuthSettings::new(
            &RemoteManagement::default(),
            Some("  from-env \n".to_string()),
            None,
        );
        assert!(settings.remote_allowed());

        let guard = AuthGuard::new(settings);
        assert_eq!(guard.authorize(REMOTE, Some("from-env")), Ok(()));
    }

    #[test]
    fn test_blank_values_are_unset() {
        let remote = RemoteManagement {
            allow_remote: false,
            secret_key: Some("   ".to_string()),
        };
        let settings = AuthSettings::new(&remote, Some(String::new()), Some(" ".to_string()));
        assert!(settings.secret_hash.is_none());
        assert!(settings.env_secret.is_none());
        assert!(settings.local_password.is_none());
        assert!(!settings.remote_allowed());
    }

    #[test]
    fn test_local_password_only_for_loopback() {
        let guard = AuthGuard::new(AuthSettings {
            allow_remote: true,
            env_secret: Some("env".to_string()),
            local_password: Some("local".to_string()),
            ..Default::default()
        });

        assert_eq!(guard.authorize(LOCAL, Some("local")), Ok(()));
        assert_eq!(guard.authorize(REMOTE, Some("local")), Err(AuthError::InvalidKey));
        assert_eq!(guard.authorize(REMOTE, Some("env")), Ok(()));
    }

    #[test]
    fn test_local_password_without_remote_secret() {
        let guard = AuthGuard::new(AuthSettings {
            local_password: Some("local".to_string()),
            ..Default::default()
        });

        assert_eq!(guard.authorize(LOCAL, Some("local")), Ok(()));
        assert_eq!(
            guard.authorize(REMOTE, Some("local")),
            Err(AuthError::RemoteDisabled)
        );
    }

    #[test]
    fn test_ban_after_five_failures_then_expiry() {
        let guard = guard(true, "s3cret");
        let start = Instant::now();

        for i in 0..MAX_FAILURES {
            let provided = if i % 2 == 0 { Some("wrong") } else { None };
            assert!(guard.authorize_at(REMOTE, provided, start).is_err());
        }

        let err = guard
            .authorize_at(REMOTE, Some("s3cret"), start + Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err, AuthError::Banned(BAN_DURATION - Duration::from_secs(1)));
        assert_eq!(
            err.to_string(),
            "IP banned due to too many failed attempts. Try again in 29m59s"
        );

        let later = start + BAN_DURATION + Duration::from_secs(1);
        assert_eq!(guard.authorize_at(REMOTE, Some("s3cret"), later), Ok(()));
        assert_eq!(guard.attempts().failures(REMOTE), 0);
        assert!(guard.attempts().is_empty());
    }

    #[test]
    fn test_success_resets_failures() {
        let guard = guard(true, "s3cret");
        let now = Instant::now();

        for _ in 0..MAX_FAILURES - 1 {
            let _ = guard.authorize_at(REMOTE, Some("wrong"), now);
        }
        assert_eq!(guard.attempts().failures(REMOTE), MAX_FAILURES - 1);

        assert_eq!(guard.authorize_at(REMOTE, Some("s3cret"), now), Ok(()));
        assert_eq!(guard.attempts().failures(REMOTE), 0);

        // A fresh run of failures is needed for a ban.
        let _ = guard.authorize_at(REMOTE, Some("wrong"), now);
        assert_eq!(guard.authorize_at(REMOTE, Some("s3cret"), now), Ok(()));
    }

    #[test]
    fn test_tracker_evicts_least_recently_seen() {
        let tracker = AttemptTracker::new(2);
        let start = Instant::now();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        let c: IpAddr = "10.0.0.3".parse().unwrap();

        tracker.record_failure(a, start);
        tracker.record_failure(b, start + Duration::from_secs(1));
        tracker.record_failure(a, start + Duration::from_secs(2));
        tracker.record_failure(c, start + Duration::from_secs(3));

        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.failures(a), 2);
        assert_eq!(tracker.failures(b), 0);
        assert_eq!(tracker.failures(c), 1);
    }
}
