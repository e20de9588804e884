//! In-memory ledger backend.
//!
//! Provides a fast, non-persistent ledger using DashMap for concurrent
//! access. Ideal for testing and for a single long-running process.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::backend::LedgerBackend;
use super::types::{CasOutcome, OwnershipUpdate, Snapshot, Source};
use crate::identity::{Identity, IdentityOutcome, ReentryPolicy};

/// In-memory ledger backend using DashMap.
///
/// Conditional writes hold the record's shard lock between the comparison
/// and the write, so concurrent callers cannot both commit.
///
/// # Thread Safety
///
/// `MemoryBackend` is `Clone`; clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    sources: Arc<DashMap<String, Source>>,
    identities: Arc<DashMap<String, Identity>>,
    revision: Arc<AtomicU64>,
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if there are no sources.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl LedgerBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        // Read the revision first: a write racing the iteration makes the
        // next poll see a newer revision and re-read.
        let revision = self.revision.load(Ordering::Acquire);
        let sources = self
            .sources
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        Ok(Snapshot::new(revision, sources))
    }

    async fn revision(&self) -> Result<u64> {
        Ok(self.revision.load(Ordering::Acquire))
    }

    async fn get(&self, id: &str) -> Result<Option<Source>> {
        Ok(self.sources.get(id).map(|entry| entry.value().clone()))
    }

    async fn insert(&self, path: &str) -> Result<Source> {
        let source = Source::unclaimed(path);
        self.sources.insert(source.id.clone(), source.clone());
        self.bump();
        Ok(source)
    }

    async fn compare_and_swap_ownership(
        &self,
        id: &str,
        expected_owner: &str,
        update: OwnershipUpdate,
    ) -> Result<CasOutcome> {
        let Some(mut entry) = self.sources.get_mut(id) else {
            return Ok(CasOutcome::Missing);
        };

        if entry.use_user != expected_owner || entry.version != update.base_version {
            return Ok(CasOutcome::Rejected(entry.value().clone()));
        }

        entry.apply(&update);
        let committed = entry.value().clone();
        drop(entry);

        self.bump();
        Ok(CasOutcome::Committed(committed))
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.sources.remove(id).is_some();
        if removed {
            self.bump();
        }
        Ok(removed)
    }

    async fn upsert_identity(
        &self,
        name: &str,
        login_at: i64,
        policy: ReentryPolicy,
    ) -> Result<IdentityOutcome> {
        match self.identities.entry(name.to_string()) {
            Entry::Vacant(vacant) => {
                let identity = Identity::active(name, login_at);
                vacant.insert(identity.clone());
                Ok(IdentityOutcome::Created(identity))
            },
            Entry::Occupied(mut occupied) => match policy {
                ReentryPolicy::Reject => Ok(IdentityOutcome::Taken),
                ReentryPolicy::Reactivate => {
                    let identity = occupied.get_mut();
                    identity.is_active = true;
                    identity.login_at = login_at;
                    Ok(IdentityOutcome::Reactivated(identity.clone()))
                },
            },
        }
    }

    async fn get_identity(&self, name: &str) -> Result<Option<Identity>> {
        Ok(self.identities.get(name).map(|entry| entry.value().clone()))
    }
}
