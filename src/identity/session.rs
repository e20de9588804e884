//! Client-local session state.
//!
//! The logged-in name lives in a small JSON file that belongs to this
//! client only; it is never written to the shared store. Anything
//! unreadable in that file counts as "logged out".

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::validate_name;
use crate::error::Error;

/// The operator on whose behalf protocol calls are made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    user: String,
}

impl Session {
    /// Start a session for an already validated name.
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Borrow the session, or fail with [`Error::NotLoggedIn`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`] for `None`.
    pub fn require(session: Option<&Session>) -> crate::error::Result<&Session> {
        session.ok_or(Error::NotLoggedIn)
    }
}

/// On-disk cache of the current session.
#[derive(Debug, Clone)]
pub struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached session.
    ///
    /// Missing, unparsable, or invalid data yields `None`; corrupt files are
    /// removed so the warning is only logged once.
    pub fn load(&self) -> Option<Session> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Session cache unreadable");
                return None;
            },
        };

        let session = serde_json::from_str::<Session>(&content)
            .ok()
            .and_then(|s| validate_name(&s.user).ok().map(Session::new));

        if session.is_none() {
            warn!(path = %self.path.display(), "Discarding corrupt session cache");
            if let Err(e) = fs::remove_file(&self.path) {
                debug!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove corrupt session cache"
                );
            }
        }
        session
    }

    /// Persist `session`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn store(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create session directory: {}", parent.display())
            })?;
        }
        let json = serde_json::to_string(session).context("Failed to serialize session")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write session: {}", self.path.display()))
    }

    /// Forget the current session. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be removed.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove session: {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_and_load() {
        let tmp = TempDir::new().unwrap();
        let cache = SessionCache::new(tmp.path().join("session.json"));

        assert_eq!(cache.load(), None);
        cache.store(&Session::new("alice")).unwrap();
        assert_eq!(cache.load(), Some(Session::new("alice")));

        cache.clear().unwrap();
        assert_eq!(cache.load(), None);
        cache.clear().unwrap();
    }

    #[test]
    fn test_corrupt_cache_is_logged_out() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");
        fs::write(&path, "{not json").unwrap();

        let cache = SessionCache::new(&path);
        assert_eq!(cache.load(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_invalid_cached_name_is_logged_out() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");
        fs::write(&path, r#"{"user":"a/b"}"#).unwrap();

        assert_eq!(SessionCache::new(&path).load(), None);
    }

    #[test]
    fn test_require() {
        let session = Session::new("alice");
        assert_eq!(Session::require(Some(&session)).unwrap().user(), "alice");
        assert!(matches!(Session::require(None), Err(Error::NotLoggedIn)));
    }
}
