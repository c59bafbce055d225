//! Precedence resolution for the read-only storage settings.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Side file (`read_only_storage.json`, applied later by [`load_side_file`])
//! 2. `READ_ONLY` / `SYNC_INTERVAL_MINUTES` environment variables
//! 3. config.kdl (`read-only-storage`, `sync-interval-minutes`)
//! 4. Built-in defaults (writable, no interval override)
//!
//! Environment values that do not parse, and intervals that are not positive,
//! are ignored rather than rejected.
//!
//! [`load_side_file`]: super::load_side_file

use super::schema::ServerConfig;

/// Environment variable overriding the read-only flag.
pub const READ_ONLY_ENV: &str = "READ_ONLY";

/// Environment variable overriding the sync interval (whole minutes).
pub const SYNC_INTERVAL_MINUTES_ENV: &str = "SYNC_INTERVAL_MINUTES";

/// Origin of a resolved setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Named environment variable
    EnvVar(String),
    ConfigFile,
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile => write!(f, "config"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A setting together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Startup values for [`ConfigState`](super::ConfigState), before the side file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub read_only: Resolved<bool>,
    /// 0 means no override; the scheduler then uses its default.
    pub sync_interval_minutes: Resolved<i64>,
}

/// Resolve settings from `config` and the process environment.
pub fn resolve_settings(config: &ServerConfig) -> ResolvedSettings {
    resolve_settings_with_env(config, |name| std::env::var(name).ok())
}

/// Resolve settings from `config` and an environment lookup.
///
/// Takes the lookup as a closure so tests do not mutate the process env.
pub fn resolve_settings_with_env(
    config: &ServerConfig,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedSettings {
    let mut read_only = if config.read_only_storage {
        Resolved::new(true, ValueSource::ConfigFile)
    } else {
        Resolved::new(false, ValueSource::Default)
    };
    let mut sync_interval_minutes = match config.sync_interval_minutes {
        Some(minutes) if minutes > 0 => Resolved::new(minutes, ValueSource::ConfigFile),
        _ => Resolved::new(0, ValueSource::Default),
    };

    if let Some(value) = env(READ_ONLY_ENV).as_deref().and_then(parse_bool) {
        read_only = Resolved::new(value, ValueSource::EnvVar(READ_ONLY_ENV.to_string()));
    }
    if let Some(minutes) = env(SYNC_INTERVAL_MINUTES_ENV)
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .filter(|minutes| *minutes > 0)
    {
        sync_interval_minutes = Resolved::new(
            minutes,
            ValueSource::EnvVar(SYNC_INTERVAL_MINUTES_ENV.to_string()),
        );
    }

    ResolvedSettings {
        read_only,
        sync_interval_minutes,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
