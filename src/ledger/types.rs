//! Record types shared by every ledger backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Characters that may not appear in store keys or operator names.
pub const RESERVED_KEY_CHARS: [char; 6] = ['.', '$', '#', '[', ']', '/'];

/// A claimable source path.
///
/// `use_user` is empty while the source is unclaimed. `last_user` is empty
/// until the first ownership change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Store-assigned key.
    pub id: String,
    /// Full path, e.g. `/www/test.php`.
    pub path: String,
    /// Current claimant, empty when unclaimed.
    #[serde(default)]
    pub use_user: String,
    /// Previous claimant.
    #[serde(default)]
    pub last_user: String,
    /// UTC date (`YYYY-MM-DD`) of the last ownership change.
    #[serde(default)]
    pub last_update_date: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Incremented by every ownership change.
    #[serde(default)]
    pub version: u64,
}

impl Source {
    /// Create a fresh unclaimed record with a new id and the current time.
    pub(crate) fn unclaimed(path: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            path: path.to_string(),
            use_user: String::new(),
            last_user: String::new(),
            last_update_date: String::new(),
            timestamp: Utc::now().timestamp_millis(),
            version: 0,
        }
    }

    /// Current owner, if any.
    pub fn owner(&self) -> Option<&str> {
        (!self.use_user.is_empty()).then_some(self.use_user.as_str())
    }

    /// Returns true if someone holds this source.
    pub fn is_claimed(&self) -> bool {
        !self.use_user.is_empty()
    }

    /// Returns true if `user` holds this source.
    pub fn is_held_by(&self, user: &str) -> bool {
        !user.is_empty() && self.use_user == user
    }

    /// Overwrite the ownership fields in one step.
    pub(crate) fn apply(&mut self, update: &OwnershipUpdate) {
        self.use_user.clone_from(&update.use_user);
        self.last_user.clone_from(&update.last_user);
        self.last_update_date.clone_from(&update.last_update_date);
        self.timestamp = update.timestamp;
        self.version = update.base_version + 1;
    }
}

/// The four fields every ownership change rewrites together.
///
/// An update is computed from one read of the record, and `base_version`
/// is the version that read saw. A conditional write only commits while
/// the stored record is still at that version, so an update built from a
/// stale read can never overwrite `last_user` with an outdated value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnershipUpdate {
    pub use_user: String,
    pub last_user: String,
    pub last_update_date: String,
    pub timestamp: i64,
    pub base_version: u64,
}

impl OwnershipUpdate {
    /// Give `user` the source. The previous owner (or the existing
    /// `last_user` when nobody holds it) becomes `last_user`.
    pub fn claim(current: &Source, user: &str, now: DateTime<Utc>) -> Self {
        let last_user = current
            .owner()
            .unwrap_or(current.last_user.as_str())
            .to_string();
        Self {
            use_user: user.to_string(),
            last_user,
            last_update_date: iso_date(now),
            timestamp: now.timestamp_millis(),
            base_version: current.version,
        }
    }

    /// Clear the claim, recording the releasing owner as `last_user`.
    pub fn release(current: &Source, now: DateTime<Utc>) -> Self {
        let last_user = current
            .owner()
            .unwrap_or(current.last_user.as_str())
            .to_string();
        Self {
            use_user: String::new(),
            last_user,
            last_update_date: iso_date(now),
            timestamp: now.timestamp_millis(),
            base_version: current.version,
        }
    }
}

/// Result of a conditional ownership write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The expectation held and the update was stored.
    Committed(Source),
    /// Someone else changed the owner first. Carries the stored record.
    Rejected(Source),
    /// No record with that id exists.
    Missing,
}

impl CasOutcome {
    /// Returns true if the write was stored.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// Full ledger contents at one store revision.
///
/// Sources are in no particular order; use [`crate::view::project`] for
/// presentation.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Store change counter observed when the snapshot was read.
    pub revision: u64,
    /// All records.
    pub sources: Arc<Vec<Source>>,
}

impl Snapshot {
    pub(crate) fn new(revision: u64, sources: Vec<Source>) -> Self {
        Self {
            revision,
            sources: Arc::new(sources),
        }
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Top-level namespace a source path lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootPath {
    Sysadmin,
    Www,
    AmpSet,
}

impl RootPath {
    /// Every root, in display order.
    pub const ALL: [RootPath; 3] = [RootPath::Sysadmin, RootPath::Www, RootPath::AmpSet];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sysadmin => "sysadmin",
            Self::Www => "www",
            Self::AmpSet => "amp_set",
        }
    }
}

impl fmt::Display for RootPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RootPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|root| root.as_str() == s)
            .ok_or_else(|| {
                Error::InvalidPath(format!(
                    "unknown root '{s}' (expected one of: sysadmin, www, amp_set)"
                ))
            })
    }
}

/// Build `/<root>/<subpath>`.
///
/// Whitespace and any leading or trailing slashes on `subpath` are stripped
/// so the result never contains `//` at the joins.
///
/// # Errors
///
/// Returns [`Error::InvalidPath`] if nothing remains after stripping.
pub fn source_path(root: RootPath, subpath: &str) -> Result<String> {
    let trimmed = subpath.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidPath("path cannot be empty".to_string()));
    }
    Ok(format!("/{root}/{trimmed}"))
}

/// Format `now` as an ISO calendar date.
pub(crate) fn iso_date(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(use_user: &str, last_user: &str) -> Source {
        Source {
            id: "id-1".to_string(),
            path: "/www/test.php".to_string(),
            use_user: use_user.to_string(),
            last_user: last_user.to_string(),
            last_update_date: String::new(),
            timestamp: 0,
            version: 0,
        }
    }

    #[test]
    fn test_source_path_strips_slashes() {
        assert_eq!(
            source_path(RootPath::Www, "test.php").unwrap(),
            "/www/test.php"
        );
        assert_eq!(
            source_path(RootPath::Sysadmin, "//a/b.php/ ").unwrap(),
            "/sysadmin/a/b.php"
        );
        assert_eq!(
            source_path(RootPath::AmpSet, "  x  ").unwrap(),
            "/amp_set/x"
        );
    }

    #[test]
    fn test_source_path_rejects_empty() {
        assert!(matches!(
            source_path(RootPath::Www, "   "),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            source_path(RootPath::Www, "///"),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn test_root_path_parse() {
        assert_eq!("amp_set".parse::<RootPath>().unwrap(), RootPath::AmpSet);
        assert!("etc".parse::<RootPath>().is_err());
    }

    #[test]
    fn test_claim_keeps_previous_last_user() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        let update = OwnershipUpdate::claim(&record("", "carol"), "alice", now);
        assert_eq!(update.use_user, "alice");
        assert_eq!(update.last_user, "carol");
        assert_eq!(update.last_update_date, "2026-03-04");
        assert_eq!(update.timestamp, now.timestamp_millis());
    }

    #[test]
    fn test_claim_from_owner_records_owner() {
        let now = Utc::now();
        let update = OwnershipUpdate::claim(&record("alice", ""), "bob", now);
        assert_eq!(update.last_user, "alice");
    }

    #[test]
    fn test_release_records_owner() {
        let now = Utc::now();
        let update = OwnershipUpdate::release(&record("alice", "carol"), now);
        assert_eq!(update.use_user, "");
        assert_eq!(update.last_user, "alice");
    }

    #[test]
    fn test_apply_advances_version() {
        let mut source = record("", "");
        source.version = 4;
        let update = OwnershipUpdate::claim(&source, "alice", Utc::now());
        assert_eq!(update.base_version, 4);

        source.apply(&update);
        assert_eq!(source.version, 5);
        assert_eq!(OwnershipUpdate::release(&source, Utc::now()).base_version, 5);
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(record("alice", "")).unwrap();
        assert_eq!(json["useUser"], "alice");
        assert_eq!(json["lastUser"], "");
        assert!(json.get("lastUpdateDate").is_some());
    }

    #[test]
    fn test_fresh_ids_avoid_reserved_chars() {
        let source = Source::unclaimed("/www/a");
        assert!(!source.id.contains(RESERVED_KEY_CHARS));
        assert!(!source.is_claimed());
    }
}
