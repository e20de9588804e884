//! Path resolution for sourcelock client files.
//!
//! - [`get_home_dir`] - `~/.sourcelock/` (base directory)
//! - [`get_config_path`] - `~/.sourcelock/config.toml`
//! - [`get_session_path`] - `~/.sourcelock/session.json` (logged-in name)

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable that relocates the base directory.
pub const HOME_ENV: &str = "SOURCELOCK_HOME";

/// Get the sourcelock base directory.
///
/// Resolution order:
/// 1. `SOURCELOCK_HOME` environment variable (if set and non-empty)
/// 2. `~/.sourcelock/`
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV)
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home));
    }

    let home = dirs::home_dir().context("Failed to get home directory")?;
    Ok(home.join(".sourcelock"))
}

/// Get the default config path: `~/.sourcelock/config.toml`
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("config.toml"))
}

/// Get the session cache path: `~/.sourcelock/session.json`
pub fn get_session_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("session.json"))
}
