//! Claim and release rules layered on the ledger's compare-and-set.
//!
//! Each source is either unclaimed or held by exactly one operator:
//!
//! | current        | request        | result                                 |
//! |----------------|----------------|----------------------------------------|
//! | unclaimed      | `claim(u)`     | held by `u`                            |
//! | held by `u`    | `claim(u)`     | unclaimed (toggle-off, same as release)|
//! | held by `u`    | `release(u)`   | unclaimed, `last_user = u`             |
//! | held by `u1`   | `claim(u2)`    | refused, `Busy { owner: u1 }`          |
//! | held by `u`    | `handoff(u,v)` | held by `v`, `last_user = u`           |
//!
//! The decision is made against a fresh read and then written with the
//! owner that read observed as the CAS expectation. If another operator
//! got there first the write does not commit, the record is re-read, and
//! the caller learns who holds it now.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identity::{Session, validate_name};
use crate::ledger::{CasOutcome, Ledger, OwnershipUpdate, RootPath, Source, source_path};

/// What a successful toggle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller now holds the source.
    Claimed(Source),
    /// The caller held the source and gave it up.
    Released(Source),
}

impl ClaimOutcome {
    pub fn source(&self) -> &Source {
        match self {
            Self::Claimed(source) | Self::Released(source) => source,
        }
    }

    /// A short confirmation for the operator.
    pub fn notice(&self, user: &str) -> String {
        match self {
            Self::Claimed(source) => format!("{user} checked out {}", source.path),
            Self::Released(source) => format!("{user} released {}", source.path),
        }
    }
}

/// A planned ownership change for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Claim(OwnershipUpdate),
    Release(OwnershipUpdate),
}

/// Decide what a claim request by `user` does to `current`.
///
/// Pure: reads nothing and writes nothing.
///
/// # Errors
///
/// Returns [`Error::Busy`] if someone else holds the source.
pub fn plan_toggle(current: &Source, user: &str, now: DateTime<Utc>) -> Result<Transition> {
    match current.owner() {
        None => Ok(Transition::Claim(OwnershipUpdate::claim(current, user, now))),
        Some(owner) if owner == user => {
            Ok(Transition::Release(OwnershipUpdate::release(current, now)))
        },
        Some(owner) => Err(Error::Busy {
            id: current.id.clone(),
            path: current.path.clone(),
            owner: owner.to_string(),
        }),
    }
}

/// Decide what an explicit release by `user` does to `current`.
///
/// # Errors
///
/// Returns [`Error::Busy`] if someone else holds the source, or
/// [`Error::NotHolder`] if nobody does.
pub fn plan_release(current: &Source, user: &str, now: DateTime<Utc>) -> Result<OwnershipUpdate> {
    match current.owner() {
        Some(owner) if owner == user => Ok(OwnershipUpdate::release(current, now)),
        Some(owner) => Err(Error::Busy {
            id: current.id.clone(),
            path: current.path.clone(),
            owner: owner.to_string(),
        }),
        None => Err(Error::NotHolder {
            id: current.id.clone(),
            path: current.path.clone(),
            user: user.to_string(),
        }),
    }
}

/// Ownership operations on behalf of a session.
#[derive(Clone)]
pub struct ClaimService {
    ledger: Ledger,
}

impl ClaimService {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Add `/<root>/<subpath>` as a new unclaimed source.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPath`] if the subpath is blank
    /// - [`Error::StoreUnavailable`] if the store fails
    pub async fn add(&self, root: RootPath, subpath: &str) -> Result<Source> {
        let path = source_path(root, subpath)?;
        self.ledger.insert(&path).await
    }

    /// Claim the source, or release it if the session already holds it.
    ///
    /// # Errors
    ///
    /// - [`Error::SourceNotFound`] if the source doesn't exist
    /// - [`Error::Busy`] if someone else holds it, including when they won
    ///   a race against this request
    /// - [`Error::Conflict`] if the record changed under this request and
    ///   nobody holds it now
    /// - [`Error::StoreUnavailable`] if the store fails
    pub async fn toggle(&self, session: &Session, id: &str) -> Result<ClaimOutcome> {
        let user = session.user();
        let current = self.load(id).await?;

        let expected = current.use_user.clone();

        match plan_toggle(&current, user, Utc::now())? {
            Transition::Claim(update) => {
                let stored = self.commit(&current, &expected, update).await?;
                Ok(ClaimOutcome::Claimed(stored))
            },
            Transition::Release(update) => {
                let stored = self.commit(&current, &expected, update).await?;
                Ok(ClaimOutcome::Released(stored))
            },
        }
    }

    /// Give up a source held by the session.
    ///
    /// # Errors
    ///
    /// - [`Error::SourceNotFound`] if the source doesn't exist
    /// - [`Error::Busy`] if someone else holds it
    /// - [`Error::NotHolder`] if nobody holds it
    /// - [`Error::StoreUnavailable`] if the store fails
    pub async fn release(&self, session: &Session, id: &str) -> Result<Source> {
        let current = self.load(id).await?;
        let update = plan_release(&current, session.user(), Utc::now())?;
        let expected = current.use_user.clone();
        self.commit(&current, &expected, update).await
    }

    /// Transfer a source the session holds directly to `to`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidName`] if `to` is not a valid name
    /// - [`Error::SourceNotFound`] if the source doesn't exist
    /// - [`Error::Busy`] / [`Error::NotHolder`] if the session doesn't hold it
    /// - [`Error::StoreUnavailable`] if the store fails
    pub async fn handoff(&self, session: &Session, id: &str, to: &str) -> Result<Source> {
        let to = validate_name(to)?;
        let current = self.load(id).await?;

        // Only the holder may hand off; reuse the release rules for the check.
        plan_release(&current, session.user(), Utc::now())?;

        let update = OwnershipUpdate::claim(&current, &to, Utc::now());
        let expected = current.use_user.clone();
        self.commit(&current, &expected, update).await
    }

    /// Delete a source whatever its ownership state.
    ///
    /// Returns `Ok(false)` if it was already gone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store fails.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.ledger.remove(id).await
    }

    async fn load(&self, id: &str) -> Result<Source> {
        self.ledger
            .get(id)
            .await?
            .ok_or_else(|| Error::source_not_found(id))
    }

    async fn commit(
        &self,
        current: &Source,
        expected: &str,
        update: OwnershipUpdate,
    ) -> Result<Source> {
        match self
            .ledger
            .compare_and_swap_ownership(&current.id, expected, update)
            .await?
        {
            CasOutcome::Committed(stored) => {
                info!(id = %stored.id, owner = %stored.use_user, "Ownership committed");
                Ok(stored)
            },
            CasOutcome::Rejected(now) => {
                debug!(id = %now.id, owner = %now.use_user, "Lost ownership race");
                Err(match now.owner() {
                    Some(owner) => Error::Busy {
                        id: now.id.clone(),
                        path: now.path.clone(),
                        owner: owner.to_string(),
                    },
                    None => Error::Conflict { id: now.id },
                })
            },
            CasOutcome::Missing => Err(Error::source_not_found(&current.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ledger::testing::{Interference, ScriptedBackend};
    use std::sync::Arc;

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
    fn test_plan_toggle_states() {
        let now = Utc::now();

        match plan_toggle(&record("", ""), "alice", now).unwrap() {
            Transition::Claim(update) => assert_eq!(update.use_user, "alice"),
            other => panic!("expected claim, got {other:?}"),
        }

        match plan_toggle(&record("alice", ""), "alice", now).unwrap() {
            Transition::Release(update) => {
                assert_eq!(update.use_user, "");
                assert_eq!(update.last_user, "alice");
            },
            other => panic!("expected release, got {other:?}"),
        }

        let err = plan_toggle(&record("alice", ""), "bob", now).unwrap_err();
        assert_eq!(err.holder(), Some("alice"));
    }

    #[test]
    fn test_plan_release_requires_holder() {
        let now = Utc::now();
        assert!(plan_release(&record("alice", ""), "alice", now).is_ok());
        assert!(matches!(
            plan_release(&record("alice", ""), "bob", now),
            Err(Error::Busy { .. })
        ));
        assert!(matches!(
            plan_release(&record("", "alice"), "alice", now),
            Err(Error::NotHolder { .. })
        ));
    }

    #[tokio::test]
    async fn test_toggle_twice_releases() {
        let service = ClaimService::new(Ledger::memory());
        let alice = Session::new("alice");
        let source = service.add(RootPath::Www, "test.php").await.unwrap();

        let first = service.toggle(&alice, &source.id).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(_)));
        assert_eq!(first.source().use_user, "alice");
        assert_eq!(first.source().last_user, "");

        let second = service.toggle(&alice, &source.id).await.unwrap();
        assert!(matches!(second, ClaimOutcome::Released(_)));
        assert_eq!(second.source().use_user, "");
        assert_eq!(second.source().last_user, "alice");
        assert!(!second.source().last_update_date.is_empty());
    }

    #[tokio::test]
    async fn test_toggle_equals_release() {
        let service = ClaimService::new(Ledger::memory());
        let alice = Session::new("alice");
        let a = service.add(RootPath::Www, "a.php").await.unwrap();
        let b = service.add(RootPath::Www, "b.php").await.unwrap();

        service.toggle(&alice, &a.id).await.unwrap();
        service.toggle(&alice, &b.id).await.unwrap();

        let toggled = service.toggle(&alice, &a.id).await.unwrap();
        let released = service.release(&alice, &b.id).await.unwrap();

        assert_eq!(toggled.source().use_user, released.use_user);
        assert_eq!(toggled.source().last_user, released.last_user);
    }

    #[tokio::test]
    async fn test_busy_leaves_record_unchanged() {
        let service = ClaimService::new(Ledger::memory());
        let source = service.add(RootPath::Www, "test.php").await.unwrap();
        service
            .toggle(&Session::new("alice"), &source.id)
            .await
            .unwrap();
        let before = service.ledger().get(&source.id).await.unwrap();

        let err = service
            .toggle(&Session::new("bob"), &source.id)
            .await
            .unwrap_err();
        assert_eq!(err.holder(), Some("alice"));
        assert_eq!(service.ledger().get(&source.id).await.unwrap(), before);

        let err = service
            .release(&Session::new("bob"), &source.id)
            .await
            .unwrap_err();
        assert_eq!(err.holder(), Some("alice"));
    }

    #[tokio::test]
    async fn test_history_preserved_across_owners() {
        let service = ClaimService::new(Ledger::memory());
        let alice = Session::new("alice");
        let bob = Session::new("bob");
        let source = service.add(RootPath::Sysadmin, "cron.sh").await.unwrap();

        service.toggle(&alice, &source.id).await.unwrap();
        service.release(&alice, &source.id).await.unwrap();

        // Bob's claim keeps alice as last_user.
        let claimed = service.toggle(&bob, &source.id).await.unwrap();
        assert_eq!(claimed.source().use_user, "bob");
        assert_eq!(claimed.source().last_user, "alice");

        let released = service.toggle(&bob, &source.id).await.unwrap();
        assert_eq!(released.source().last_user, "bob");
    }

    #[tokio::test]
    async fn test_handoff() {
        let service = ClaimService::new(Ledger::memory());
        let alice = Session::new("alice");
        let source = service.add(RootPath::Www, "test.php").await.unwrap();
        service.toggle(&alice, &source.id).await.unwrap();

        let handed = service.handoff(&alice, &source.id, "bob").await.unwrap();
        assert_eq!(handed.use_user, "bob");
        assert_eq!(handed.last_user, "alice");

        // Alice no longer holds it.
        let err = service
            .handoff(&alice, &source.id, "carol")
            .await
            .unwrap_err();
        assert_eq!(err.holder(), Some("bob"));

        let err = service
            .handoff(&Session::new("bob"), &source.id, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidName { .. }));
    }

    #[tokio::test]
    async fn test_delete_while_claimed() {
        let service = ClaimService::new(Ledger::memory());
        let source = service.add(RootPath::AmpSet, "x.js").await.unwrap();
        service
            .toggle(&Session::new("alice"), &source.id)
            .await
            .unwrap();

        assert!(service.delete(&source.id).await.unwrap());
        assert!(!service.delete(&source.id).await.unwrap());

        let err = service
            .toggle(&Session::new("alice"), &source.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_add_rejects_blank_path() {
        let service = ClaimService::new(Ledger::memory());
        let err = service.add(RootPath::Www, " / ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
        assert!(service.ledger().snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lost_race_reports_winner() {
        let backend = Arc::new(ScriptedBackend::with_interference(Interference::Claim(
            "carol",
        )));
        let service = ClaimService::new(Ledger::from_arc(backend));
        let source = service.add(RootPath::Www, "test.php").await.unwrap();

        let err = service
            .toggle(&Session::new("alice"), &source.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy { ref owner, .. } if owner == "carol"));

        let stored = service.ledger().get(&source.id).await.unwrap().unwrap();
        assert_eq!(stored.use_user, "carol");
    }

    #[tokio::test]
    async fn test_claim_and_release_between_read_and_write() {
        // alice claims and releases while bob's claim is in flight. The
        // owner is "" again, but bob computed his update from an older
        // version and must not overwrite alice's history.
        let backend = Arc::new(ScriptedBackend::with_interference(
            Interference::ClaimAndRelease("alice"),
        ));
        let service = ClaimService::new(Ledger::from_arc(backend));
        let source = service.add(RootPath::Www, "test.php").await.unwrap();

        let err = service
            .toggle(&Session::new("bob"), &source.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }), "got {err:?}");

        let stored = service.ledger().get(&source.id).await.unwrap().unwrap();
        assert_eq!(stored.use_user, "");
        assert_eq!(stored.last_user, "alice");
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let backend = Arc::new(ScriptedBackend::new());
        let service = ClaimService::new(Ledger::from_arc(backend.clone()));
        let source = service.add(RootPath::Www, "test.php").await.unwrap();

        backend.set_writes_down(true);
        let err = service
            .toggle(&Session::new("alice"), &source.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable { .. }), "got {err:?}");
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.is_retryable());

        let err = service.add(RootPath::Www, "other.php").await.unwrap_err();
        assert!(err.is_retryable());

        backend.set_writes_down(false);
        let snapshot = service.ledger().snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(&source.id), Some(&source));
    }
}
