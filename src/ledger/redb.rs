//! Redb-backed ledger backend.
//!
//! Provides persistent storage using redb. Redb serializes write
//! transactions, so a conditional write that reads and replaces a record
//! inside one write transaction is atomic with respect to every other
//! writer on the same database.
//!
//! Redb holds an exclusive lock on the database file. Share a redb ledger
//! between processes by running them one after another, or use the SQLite
//! backend for concurrent processes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

use super::backend::LedgerBackend;
use super::types::{CasOutcome, OwnershipUpdate, Snapshot, Source};
use crate::identity::{Identity, IdentityOutcome, ReentryPolicy};

/// Sources keyed by id, JSON-encoded.
pub(crate) const SOURCES_TABLE: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("sources");

/// Identities keyed by name, JSON-encoded.
pub(crate) const IDENTITIES_TABLE: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("identities");

/// Ledger bookkeeping (change revision).
pub(crate) const META_TABLE: TableDefinition<'static, &'static str, u64> =
    TableDefinition::new("meta");

const REVISION_KEY: &str = "revision";

/// Redb-backed ledger backend.
///
/// # Thread Safety
///
/// `RedbBackend` is `Clone` and can be shared across threads. The underlying
/// database handles concurrent access safely.
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Opens or creates a redb ledger at the given path.
    ///
    /// Creates parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Parent directory cannot be created
    /// - Database file cannot be opened (already open in another process, permissions, etc.)
    /// - Initialization transaction fails to begin or commit
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create ledger directory: {}", parent.display())
            })?;
        }

        let db = Database::create(path)
            .with_context(|| format!("Failed to open ledger database: {}", path.display()))?;

        // Create every table up front so read transactions never miss one
        let write_txn = db
            .begin_write()
            .context("Failed to begin initialization transaction")?;
        {
            write_txn
                .open_table(SOURCES_TABLE)
                .context("Failed to initialize sources table")?;
            write_txn
                .open_table(IDENTITIES_TABLE)
                .context("Failed to initialize identities table")?;
            let mut meta = write_txn
                .open_table(META_TABLE)
                .context("Failed to initialize meta table")?;
            let existing = meta
                .get(REVISION_KEY)
                .context("Failed to read ledger revision")?
                .map(|guard| guard.value());
            if existing.is_none() {
                meta.insert(REVISION_KEY, 0_u64)
                    .context("Failed to initialize ledger revision")?;
            }
        }
        write_txn
            .commit()
            .context("Failed to commit initialization transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    fn snapshot_sync(&self) -> Result<Snapshot> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;

        let meta = read_txn
            .open_table(META_TABLE)
            .context("Failed to open meta table")?;
        let revision = meta
            .get(REVISION_KEY)
            .context("Failed to read ledger revision")?
            .map_or(0, |guard| guard.value());

        let table = read_txn
            .open_table(SOURCES_TABLE)
            .context("Failed to open sources table")?;

        let mut sources = Vec::new();
        for item in table.iter().context("Failed to iterate sources table")? {
            let (key, value) = item.context("Failed to read source entry")?;
            let source: Source = serde_json::from_slice(value.value())
                .with_context(|| format!("Failed to deserialize source '{}'", key.value()))?;
            sources.push(source);
        }

        Ok(Snapshot::new(revision, sources))
    }

    fn revision_sync(&self) -> Result<u64> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let meta = read_txn
            .open_table(META_TABLE)
            .context("Failed to open meta table")?;
        let revision = meta
            .get(REVISION_KEY)
            .context("Failed to read ledger revision")?
            .map_or(0, |guard| guard.value());
        Ok(revision)
    }

    fn get_sync(&self, id: &str) -> Result<Option<Source>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;

        let table = read_txn
            .open_table(SOURCES_TABLE)
            .context("Failed to open sources table")?;

        let result = table
            .get(id)
            .with_context(|| format!("Failed to read source '{id}'"))?;

        match result {
            Some(guard) => {
                let source = serde_json::from_slice(guard.value())
                    .with_context(|| format!("Failed to deserialize source '{id}'"))?;
                Ok(Some(source))
            },
            None => Ok(None),
        }
    }

    fn insert_sync(&self, path: &str) -> Result<Source> {
        let source = Source::unclaimed(path);
        let json = serde_json::to_vec(&source).context("Failed to serialize source to JSON")?;

        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(SOURCES_TABLE)
                .context("Failed to open sources table")?;
            table
                .insert(source.id.as_str(), json.as_slice())
                .with_context(|| format!("Failed to insert source '{}'", source.id))?;

            bump_revision(&write_txn)?;
        }
        write_txn
            .commit()
            .context("Failed to commit insert transaction")?;

        Ok(source)
    }

    fn compare_and_swap_sync(
        &self,
        id: &str,
        expected_owner: &str,
        update: &OwnershipUpdate,
    ) -> Result<CasOutcome> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;

        let outcome = {
            let mut table = write_txn
                .open_table(SOURCES_TABLE)
                .context("Failed to open sources table")?;

            let stored: Option<Source> = table
                .get(id)
                .with_context(|| format!("Failed to read source '{id}'"))?
                .map(|guard| serde_json::from_slice(guard.value()))
                .transpose()
                .with_context(|| format!("Failed to deserialize source '{id}'"))?;

            match stored {
                None => CasOutcome::Missing,
                Some(current)
                    if current.use_user != expected_owner
                        || current.version != update.base_version =>
                {
                    CasOutcome::Rejected(current)
                },
                Some(mut current) => {
                    current.apply(update);
                    let json = serde_json::to_vec(&current)
                        .context("Failed to serialize source to JSON")?;
                    table
                        .insert(id, json.as_slice())
                        .with_context(|| format!("Failed to update source '{id}'"))?;
                    bump_revision(&write_txn)?;
                    CasOutcome::Committed(current)
                },
            }
        };

        if outcome.is_committed() {
            write_txn
                .commit()
                .context("Failed to commit ownership transaction")?;
        } else {
            write_txn
                .abort()
                .context("Failed to abort ownership transaction")?;
        }

        Ok(outcome)
    }

    fn remove_sync(&self, id: &str) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;

        let removed = {
            let mut table = write_txn
                .open_table(SOURCES_TABLE)
                .context("Failed to open sources table")?;

            let removed = table
                .remove(id)
                .with_context(|| format!("Failed to remove source '{id}'"))?
                .is_some();
            if removed {
                bump_revision(&write_txn)?;
            }
            removed
        };

        write_txn
            .commit()
            .context("Failed to commit delete transaction")?;

        Ok(removed)
    }

    fn upsert_identity_sync(
        &self,
        name: &str,
        login_at: i64,
        policy: ReentryPolicy,
    ) -> Result<IdentityOutcome> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;

        let outcome = {
            let mut table = write_txn
                .open_table(IDENTITIES_TABLE)
                .context("Failed to open identities table")?;

            let existing: Option<Identity> = table
                .get(name)
                .with_context(|| format!("Failed to read identity '{name}'"))?
                .map(|guard| serde_json::from_slice(guard.value()))
                .transpose()
                .with_context(|| format!("Failed to deserialize identity '{name}'"))?;

            let outcome = match (existing, policy) {
                (None, _) => IdentityOutcome::Created(Identity::active(name, login_at)),
                (Some(_), ReentryPolicy::Reject) => IdentityOutcome::Taken,
                (Some(mut identity), ReentryPolicy::Reactivate) => {
                    identity.is_active = true;
                    identity.login_at = login_at;
                    IdentityOutcome::Reactivated(identity)
                },
            };

            if let Some(identity) = outcome.identity() {
                let json = serde_json::to_vec(identity)
                    .context("Failed to serialize identity to JSON")?;
                table
                    .insert(name, json.as_slice())
                    .with_context(|| format!("Failed to store identity '{name}'"))?;
            }
            outcome
        };

        write_txn
            .commit()
            .context("Failed to commit identity transaction")?;

        Ok(outcome)
    }

    fn get_identity_sync(&self, name: &str) -> Result<Option<Identity>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(IDENTITIES_TABLE)
            .context("Failed to open identities table")?;

        let result = table
            .get(name)
            .with_context(|| format!("Failed to read identity '{name}'"))?;

        match result {
            Some(guard) => {
                let identity = serde_json::from_slice(guard.value())
                    .with_context(|| format!("Failed to deserialize identity '{name}'"))?;
                Ok(Some(identity))
            },
            None => Ok(None),
        }
    }
}

/// Increment the change revision inside an open write transaction.
fn bump_revision(write_txn: &redb::WriteTransaction) -> Result<()> {
    let mut meta = write_txn
        .open_table(META_TABLE)
        .context("Failed to open meta table")?;
    let current = meta
        .get(REVISION_KEY)
        .context("Failed to read ledger revision")?
        .map_or(0, |guard| guard.value());
    meta.insert(REVISION_KEY, current + 1)
        .context("Failed to update ledger revision")?;
    Ok(())
}

#[async_trait]
impl LedgerBackend for RedbBackend {
    fn name(&self) -> &'static str {
        "redb"
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        let backend = self.clone();
        tokio::task::spawn_blocking(move || backend.snapshot_sync())
            .await
            .context("Task join error")?
    }

    async fn revision(&self) -> Result<u64> {
        let backend = self.clone();
        tokio::task::spawn_blocking(move || backend.revision_sync())
            .await
            .context("Task join error")?
    }

    async fn get(&self, id: &str) -> Result<Option<Source>> {
        let backend = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || backend.get_sync(&id))
            .await
            .context("Task join error")?
    }

    async fn insert(&self, path: &str) -> Result<Source> {
        let backend = self.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || backend.insert_sync(&path))
            .await
            .context("Task join error")?
    }

    async fn compare_and_swap_ownership(
        &self,
        id: &str,
        expected_owner: &str,
        update: OwnershipUpdate,
    ) -> Result<CasOutcome> {
        let backend = self.clone();
        let id = id.to_string();
        let expected_owner = expected_owner.to_string();
        tokio::task::spawn_blocking(move || {
            backend.compare_and_swap_sync(&id, &expected_owner, &update)
        })
        .await
        .context("Task join error")?
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let backend = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || backend.remove_sync(&id))
            .await
            .context("Task join error")?
    }

    async fn upsert_identity(
        &self,
        name: &str,
        login_at: i64,
        policy: ReentryPolicy,
    ) -> Result<IdentityOutcome> {
        let backend = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || backend.upsert_identity_sync(&name, login_at, policy))
            .await
            .context("Task join error")?
    }

    async fn get_identity(&self, name: &str) -> Result<Option<Identity>> {
        let backend = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || backend.get_identity_sync(&name))
            .await
            .context("Task join error")?
    }
}
