//! SQLite-backed ledger backend.
//!
//! Each source row carries a `version` column that every ownership change
//! increments. A conditional write is a single
//! `UPDATE ... WHERE use_user = ? AND version = ?` inside an immediate
//! transaction, so concurrent writers, including other
//! processes sharing the same database file, serialize on SQLite's write
//! lock and at most one of them matches the expected owner.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::backend::LedgerBackend;
use super::types::{CasOutcome, OwnershipUpdate, Snapshot, Source};
use crate::identity::{Identity, IdentityOutcome, ReentryPolicy};

/// How long a writer waits for another process's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sources (
        id               TEXT PRIMARY KEY,
        path             TEXT NOT NULL,
        use_user         TEXT NOT NULL DEFAULT '',
        last_user        TEXT NOT NULL DEFAULT '',
        last_update_date TEXT NOT NULL DEFAULT '',
        timestamp        INTEGER NOT NULL,
        version          INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS identities (
        name      TEXT PRIMARY KEY,
        is_active INTEGER NOT NULL,
        login_at  INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS ledger_meta (
        key   TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
    INSERT OR IGNORE INTO ledger_meta (key, value) VALUES ('revision', 0);
";

const SELECT_SOURCE: &str =
    "SELECT id, path, use_user, last_user, last_update_date, timestamp, version FROM sources";

/// SQLite-backed ledger backend.
///
/// # Thread Safety
///
/// `SqliteBackend` is `Clone`; clones share one connection guarded by a
/// mutex. Blocking calls run on tokio's blocking pool.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Opens or creates a SQLite ledger at the given path.
    ///
    /// Enables WAL mode so readers in other processes don't block writers.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created or
    /// the schema cannot be initialized.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create ledger directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open ledger database: {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set busy timeout")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to set PRAGMA")?;

        Self::with_connection(conn)
    }

    /// Opens a private in-memory SQLite ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be initialized.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize ledger schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn snapshot_sync(&self) -> Result<Snapshot> {
        let mut conn = self.conn.lock();
        // A deferred transaction gives the two reads one consistent view.
        let tx = conn.transaction().context("Failed to begin read transaction")?;

        let revision = read_revision(&tx)?;
        let sources = {
            let mut stmt = tx
                .prepare(SELECT_SOURCE)
                .context("Failed to prepare sources query")?;
            let rows = stmt
                .query_map([], source_from_row)
                .context("Failed to query sources")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read source row")?
        };

        tx.commit().context("Failed to finish read transaction")?;
        Ok(Snapshot::new(revision, sources))
    }

    fn revision_sync(&self) -> Result<u64> {
        let conn = self.conn.lock();
        read_revision(&conn)
    }

    fn get_sync(&self, id: &str) -> Result<Option<Source>> {
        let conn = self.conn.lock();
        select_source(&conn, id)
    }

    fn insert_sync(&self, path: &str) -> Result<Source> {
        let source = Source::unclaimed(path);

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin write transaction")?;
        tx.execute(
            "INSERT INTO sources (id, path, use_user, last_user, last_update_date, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                source.id,
                source.path,
                source.use_user,
                source.last_user,
                source.last_update_date,
                source.timestamp
            ],
        )
        .with_context(|| format!("Failed to insert source '{}'", source.id))?;
        bump_revision(&tx)?;
        tx.commit().context("Failed to commit insert transaction")?;

        Ok(source)
    }

    fn compare_and_swap_sync(
        &self,
        id: &str,
        expected_owner: &str,
        update: &OwnershipUpdate,
    ) -> Result<CasOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin write transaction")?;

        let changed = tx
            .execute(
                "UPDATE sources
                 SET use_user = ?1, last_user = ?2, last_update_date = ?3,
                     timestamp = ?4, version = version + 1
                 WHERE id = ?5 AND use_user = ?6 AND version = ?7",
                params![
                    update.use_user,
                    update.last_user,
                    update.last_update_date,
                    update.timestamp,
                    id,
                    expected_owner,
                    update.base_version
                ],
            )
            .with_context(|| format!("Failed to update source '{id}'"))?;

        if changed == 1 {
            bump_revision(&tx)?;
        }
        let current = select_source(&tx, id)?;
        tx.commit()
            .context("Failed to commit ownership transaction")?;

        Ok(match current {
            None => CasOutcome::Missing,
            Some(source) if changed == 1 => CasOutcome::Committed(source),
            Some(source) => CasOutcome::Rejected(source),
        })
    }

    fn remove_sync(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin write transaction")?;
        let removed = tx
            .execute("DELETE FROM sources WHERE id = ?1", params![id])
            .with_context(|| format!("Failed to remove source '{id}'"))?
            > 0;
        if removed {
            bump_revision(&tx)?;
        }
        tx.commit().context("Failed to commit delete transaction")?;
        Ok(removed)
    }

    fn upsert_identity_sync(
        &self,
        name: &str,
        login_at: i64,
        policy: ReentryPolicy,
    ) -> Result<IdentityOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin write transaction")?;

        let exists = select_identity(&tx, name)?.is_some();
        let outcome = match (exists, policy) {
            (false, _) => {
                tx.execute(
                    "INSERT INTO identities (name, is_active, login_at) VALUES (?1, 1, ?2)",
                    params![name, login_at],
                )
                .with_context(|| format!("Failed to create identity '{name}'"))?;
                IdentityOutcome::Created(Identity::active(name, login_at))
            },
            (true, ReentryPolicy::Reject) => IdentityOutcome::Taken,
            (true, ReentryPolicy::Reactivate) => {
                tx.execute(
                    "INSERT INTO identities (name, is_active, login_at) VALUES (?1, 1, ?2)
                     ON CONFLICT(name) DO UPDATE SET is_active = 1, login_at = excluded.login_at",
                    params![name, login_at],
                )
                .with_context(|| format!("Failed to reactivate identity '{name}'"))?;
                IdentityOutcome::Reactivated(Identity::active(name, login_at))
            },
        };

        tx.commit()
            .context("Failed to commit identity transaction")?;
        Ok(outcome)
    }

    fn get_identity_sync(&self, name: &str) -> Result<Option<Identity>> {
        let conn = self.conn.lock();
        select_identity(&conn, name)
    }
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Source> {
    Ok(Source {
        id: row.get(0)?,
        path: row.get(1)?,
        use_user: row.get(2)?,
        last_user: row.get(3)?,
        last_update_date: row.get(4)?,
        timestamp: row.get(5)?,
        version: row.get(6)?,
    })
}

fn select_source(conn: &Connection, id: &str) -> Result<Option<Source>> {
    conn.query_row(
        &format!("{SELECT_SOURCE} WHERE id = ?1"),
        params![id],
        source_from_row,
    )
    .optional()
    .with_context(|| format!("Failed to read source '{id}'"))
}

fn select_identity(conn: &Connection, name: &str) -> Result<Option<Identity>> {
    conn.query_row(
        "SELECT name, is_active, login_at FROM identities WHERE name = ?1",
        params![name],
        |row| {
            Ok(Identity {
                name: row.get(0)?,
                is_active: row.get(1)?,
                login_at: row.get(2)?,
            })
        },
    )
    .optional()
    .with_context(|| format!("Failed to read identity '{name}'"))
}

fn read_revision(conn: &Connection) -> Result<u64> {
    let revision: i64 = conn
        .query_row(
            "SELECT value FROM ledger_meta WHERE key = 'revision'",
            [],
            |row| row.get(0),
        )
        .context("Failed to read ledger revision")?;
    u64::try_from(revision).context("Ledger revision is negative")
}

fn bump_revision(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE ledger_meta SET value = value + 1 WHERE key = 'revision'",
        [],
    )
    .context("Failed to update ledger revision")?;
    Ok(())
}

#[async_trait]
impl LedgerBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_version_column_increments() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let source = backend.insert("/www/test.php").await.unwrap();

        let claim = OwnershipUpdate::claim(&source, "alice", Utc::now());
        backend
            .compare_and_swap_ownership(&source.id, "", claim)
            .await
            .unwrap();
        let claimed = backend.get(&source.id).await.unwrap().unwrap();
        let release = OwnershipUpdate::release(&claimed, Utc::now());
        backend
            .compare_and_swap_ownership(&source.id, "alice", release)
            .await
            .unwrap();

        let conn = backend.conn.lock();
        let version: i64 = conn
            .query_row(
                "SELECT version FROM sources WHERE id = ?1",
                params![source.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn test_two_handles_share_one_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.db");

        let first = SqliteBackend::open(&path).unwrap();
        let second = SqliteBackend::open(&path).unwrap();

        let source = first.insert("/www/test.php").await.unwrap();
        assert_eq!(second.revision().await.unwrap(), 1);

        let alice = OwnershipUpdate::claim(&source, "alice", Utc::now());
        let bob = OwnershipUpdate::claim(&source, "bob", Utc::now());
        let a = first
            .compare_and_swap_ownership(&source.id, "", alice)
            .await
            .unwrap();
        let b = second
            .compare_and_swap_ownership(&source.id, "", bob)
            .await
            .unwrap();

        assert!(a.is_committed());
        match b {
            CasOutcome::Rejected(current) => assert_eq!(current.use_user, "alice"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_source() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let source = Source::unclaimed("/www/ghost.php");
        let update = OwnershipUpdate::claim(&source, "alice", Utc::now());
        let outcome = backend
            .compare_and_swap_ownership(&source.id, "", update)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Missing);
        assert_eq!(backend.revision().await.unwrap(), 0);
    }
}
