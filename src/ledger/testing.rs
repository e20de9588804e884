//! A memory backend that can go offline or let a rival writer in.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::backend::LedgerBackend;
use super::memory::MemoryBackend;
use super::types::{CasOutcome, OwnershipUpdate, Snapshot, Source};
use crate::identity::{Identity, IdentityOutcome, ReentryPolicy};

/// What another operator does between a caller's read and its write.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Interference {
    None,
    /// The rival claims the record.
    Claim(&'static str),
    /// The rival claims the record and releases it again.
    ClaimAndRelease(&'static str),
}

pub(crate) struct ScriptedBackend {
    inner: MemoryBackend,
    interference: Interference,
    reads_down: AtomicBool,
    writes_down: AtomicBool,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::with_interference(Interference::None)
    }

    pub(crate) fn with_interference(interference: Interference) -> Self {
        Self {
            inner: MemoryBackend::new(),
            interference,
            reads_down: AtomicBool::new(false),
            writes_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_reads_down(&self, down: bool) {
        self.reads_down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn set_writes_down(&self, down: bool) {
        self.writes_down.store(down, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<()> {
        if self.reads_down.load(Ordering::SeqCst) {
            bail!("store offline");
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<()> {
        if self.writes_down.load(Ordering::SeqCst) {
            bail!("store offline");
        }
        Ok(())
    }

    async fn rival_claim(&self, id: &str, rival: &str) -> Result<()> {
        if let Some(current) = self.inner.get(id).await? {
            let update = OwnershipUpdate::claim(&current, rival, Utc::now());
            self.inner
                .compare_and_swap_ownership(id, &current.use_user, update)
                .await?;
        }
        Ok(())
    }

    async fn rival_release(&self, id: &str, rival: &str) -> Result<()> {
        if let Some(current) = self.inner.get(id).await?
            && current.is_held_by(rival)
        {
            let update = OwnershipUpdate::release(&current, Utc::now());
            self.inner
                .compare_and_swap_ownership(id, rival, update)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        self.check_reads()?;
        self.inner.snapshot().await
    }

    async fn revision(&self) -> Result<u64> {
        self.check_reads()?;
        self.inner.revision().await
    }

    async fn get(&self, id: &str) -> Result<Option<Source>> {
        self.check_reads()?;
        self.inner.get(id).await
    }

    async fn insert(&self, path: &str) -> Result<Source> {
        self.check_writes()?;
        self.inner.insert(path).await
    }

    async fn compare_and_swap_ownership(
        &self,
        id: &str,
        expected_owner: &str,
        update: OwnershipUpdate,
    ) -> Result<CasOutcome> {
        self.check_writes()?;
        match self.interference {
            Interference::None => {},
            Interference::Claim(rival) => self.rival_claim(id, rival).await?,
            Interference::ClaimAndRelease(rival) => {
                self.rival_claim(id, rival).await?;
                self.rival_release(id, rival).await?;
            },
        }
        self.inner
            .compare_and_swap_ownership(id, expected_owner, update)
            .await
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        self.check_writes()?;
        self.inner.remove(id).await
    }

    async fn upsert_identity(
        &self,
        name: &str,
        login_at: i64,
        policy: ReentryPolicy,
    ) -> Result<IdentityOutcome> {
        self.check_writes()?;
        self.inner.upsert_identity(name, login_at, policy).await
    }

    async fn get_identity(&self, name: &str) -> Result<Option<Identity>> {
        self.check_reads()?;
        self.inner.get_identity(name).await
    }
}
