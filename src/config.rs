//! Configuration for sourcelock clients.
//!
//! Settings come from a TOML file (by default `~/.sourcelock/config.toml`)
//! with environment variables layered on top:
//!
//! ```toml
//! [store]
//! backend = "sqlite"
//! path = "/shared/ledger.db"
//!
//! [watch]
//! poll_interval_ms = 500
//!
//! [identity]
//! reentry = "reactivate"
//! ```
//!
//! | Variable                      | Overrides                |
//! |-------------------------------|--------------------------|
//! | `SOURCELOCK_STORE_BACKEND`    | `store.backend`          |
//! | `SOURCELOCK_STORE_PATH`       | `store.path`             |
//! | `SOURCELOCK_POLL_INTERVAL_MS` | `watch.poll_interval_ms` |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::identity::ReentryPolicy;

pub const ENV_STORE_BACKEND: &str = "SOURCELOCK_STORE_BACKEND";
pub const ENV_STORE_PATH: &str = "SOURCELOCK_STORE_PATH";
pub const ENV_POLL_INTERVAL_MS: &str = "SOURCELOCK_POLL_INTERVAL_MS";

const MIN_POLL_INTERVAL_MS: u64 = 50;
const MAX_POLL_INTERVAL_MS: u64 = 60_000;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Which store implementation holds the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redb,
    Sqlite,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redb => "redb",
            Self::Sqlite => "sqlite",
        }
    }

    /// Whether the backend keeps its data in a file.
    pub fn is_file_backed(self) -> bool {
        !matches!(self, Self::Memory)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redb" => Ok(Self::Redb),
            "sqlite" => Ok(Self::Sqlite),
            other => anyhow::bail!(
                "unknown store backend '{other}' (expected sqlite, redb, or memory)"
            ),
        }
    }
}

/// Root of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Where the shared ledger lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: Option<BackendKind>,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    u64::try_from(crate::ledger::DEFAULT_POLL_INTERVAL.as_millis()).unwrap_or(500)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    #[serde(default)]
    pub reentry: ReentryPolicy,
}

impl Config {
    /// Load the configuration and apply environment overrides.
    ///
    /// An explicit path must exist. Without one, `<home>/config.toml` is
    /// read if present and defaults are used otherwise, so a client can be
    /// configured from the environment alone.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed, or an override
    /// has an invalid value.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = crate::paths::get_config_path()?;
                if path.exists() {
                    Self::load_from(&path)?
                } else {
                    Self::default()
                }
            },
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - Fields are unknown or have invalid types
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply overrides, reading variables through `lookup`.
    ///
    /// Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend name or poll interval is malformed.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(backend) = lookup(ENV_STORE_BACKEND) {
            self.store.backend = Some(
                backend
                    .parse::<BackendKind>()
                    .with_context(|| format!("Invalid {ENV_STORE_BACKEND}"))?,
            );
        }
        if let Some(path) = lookup(ENV_STORE_PATH) {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(interval) = lookup(ENV_POLL_INTERVAL_MS) {
            self.watch.poll_interval_ms = interval.trim().parse::<u64>().with_context(|| {
                format!("Invalid {ENV_POLL_INTERVAL_MS}: '{interval}' is not a number")
            })?;
        }
        Ok(())
    }

    /// Validate configuration.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error listing every problem if:
    /// - No store backend is configured
    /// - A file backend has no path
    /// - The poll interval is out of range
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        match self.store.backend {
            None => errors.push(format!(
                "store.backend is not set\n  \
                 Set it in config.toml or export {ENV_STORE_BACKEND}=sqlite"
            )),
            Some(backend) if backend.is_file_backed() => match &self.store.path {
                None => errors.push(format!(
                    "store.path is required for the {backend} backend\n  \
                     Set it in config.toml or export {ENV_STORE_PATH}=/shared/ledger.db"
                )),
                Some(path) if path.as_os_str().is_empty() => {
                    errors.push("store.path cannot be empty".to_string());
                },
                Some(path) if path.is_dir() => errors.push(format!(
                    "store.path is a directory: {}\n  \
                     Expected a database file",
                    path.display()
                )),
                Some(_) => {},
            },
            Some(_) => {},
        }

        match self.store.backend {
            Some(BackendKind::Memory) => warnings.push(
                "store.backend = \"memory\" keeps the ledger in this process only\n  \
                 Other operators will not see your claims"
                    .to_string(),
            ),
            Some(BackendKind::Redb) => warnings.push(
                "store.backend = \"redb\" locks the database file for one process at a time\n  \
                 Use \"sqlite\" when several operators share a ledger"
                    .to_string(),
            ),
            _ => {},
        }

        let interval = self.watch.poll_interval_ms;
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&interval) {
            errors.push(format!(
                "watch.poll_interval_ms must be between {MIN_POLL_INTERVAL_MS} and \
                 {MAX_POLL_INTERVAL_MS} (got {interval})"
            ));
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(ValidationResult { warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[store]
backend = "sqlite"
path = "/shared/ledger.db"

[watch]
poll_interval_ms = 250

[identity]
reentry = "reject"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.backend, Some(BackendKind::Sqlite));
        assert_eq!(config.store.path, Some(PathBuf::from("/shared/ledger.db")));
        assert_eq!(config.watch.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.identity.reentry, ReentryPolicy::Reject);
        assert!(config.validate().unwrap().warnings.is_empty());
    }

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.store.backend, None);
        assert_eq!(config.watch.poll_interval_ms, 500);
        assert_eq!(config.identity.reentry, ReentryPolicy::Reactivate);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("[store]\nurl = \"x\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_backend_fails() {
        let err = Config::default().validate().unwrap_err().to_string();
        assert!(err.contains("store.backend is not set"));
        assert!(err.contains(ENV_STORE_BACKEND));
    }

    #[test]
    fn test_file_backend_requires_path() {
        let mut config = Config::default();
        config.store.backend = Some(BackendKind::Redb);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("store.path is required for the redb backend"));
    }

    #[test]
    fn test_errors_are_collected() {
        let mut config = Config::default();
        config.store.backend = Some(BackendKind::Sqlite);
        config.watch.poll_interval_ms = 10;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("store.path"));
        assert!(err.contains("poll_interval_ms"));
    }

    #[test]
    fn test_directory_path_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.store.backend = Some(BackendKind::Sqlite);
        config.store.path = Some(tmp.path().to_path_buf());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_memory_backend_warns() {
        let mut config = Config::default();
        config.store.backend = Some(BackendKind::Memory);
        let result = config.validate().unwrap();
        assert!(result.has_warnings());
        assert!(result.warnings[0].contains("this process only"));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config: Config =
            toml::from_str("[store]\nbackend = \"redb\"\npath = \"/a.redb\"\n").unwrap();
        config
            .apply_env_with(env(&[
                (ENV_STORE_BACKEND, "SQLite"),
                (ENV_STORE_PATH, "/b.db"),
                (ENV_POLL_INTERVAL_MS, " 1000 "),
            ]))
            .unwrap();

        assert_eq!(config.store.backend, Some(BackendKind::Sqlite));
        assert_eq!(config.store.path, Some(PathBuf::from("/b.db")));
        assert_eq!(config.watch.poll_interval_ms, 1000);
    }

    #[test]
    fn test_empty_env_ignored() {
        let mut config = Config::default();
        config
            .apply_env_with(env(&[(ENV_STORE_BACKEND, "  ")]))
            .unwrap();
        assert_eq!(config.store.backend, None);
    }

    #[test]
    fn test_bad_env_values() {
        let mut config = Config::default();
        assert!(
            config
                .apply_env_with(env(&[(ENV_STORE_BACKEND, "postgres")]))
                .is_err()
        );
        assert!(
            config
                .apply_env_with(env(&[(ENV_POLL_INTERVAL_MS, "soon")]))
                .is_err()
        );
    }

    #[test]
    fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[store]\nbackend = \"memory\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.store.backend, Some(BackendKind::Memory));

        let missing = Config::load_from(tmp.path().join("nope.toml")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read config file"));
    }
}
