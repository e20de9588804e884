//! High-level `Ledger` wrapper over backend implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::backend::LedgerBackend;
use super::memory::MemoryBackend;
use super::redb::RedbBackend;
use super::sqlite::SqliteBackend;
use super::subscription::Subscription;
use super::types::{CasOutcome, OwnershipUpdate, Snapshot, Source};
use crate::config::{BackendKind, StoreConfig};
use crate::error::{Error, Result};

/// Default interval for detecting changes made by other processes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The shared list of claimable sources.
///
/// Wraps a [`LedgerBackend`] and turns its failures into
/// [`Error::StoreUnavailable`]. Every write made through a `Ledger` (or any
/// of its clones) wakes that ledger's subscribers immediately; writes from
/// other processes are picked up on the next poll.
///
/// # Thread Safety
///
/// `Ledger` is `Clone` and can be shared across tasks.
///
/// # Example
///
/// ```ignore
/// use sourcelock::ledger::Ledger;
///
/// let ledger = Ledger::memory();
/// let mut subscription = ledger.subscribe();
/// ledger.insert("/www/test.php").await?;
/// let event = subscription.next().await;
/// ```
#[derive(Clone)]
pub struct Ledger {
    backend: Arc<dyn LedgerBackend>,
    local_writes: Arc<watch::Sender<u64>>,
    poll_interval: Duration,
}

impl Ledger {
    /// Creates a `Ledger` over a fresh in-memory backend.
    pub fn memory() -> Self {
        Self::custom(MemoryBackend::new())
    }

    /// Opens a redb-backed ledger file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the database cannot be opened.
    pub fn redb<P: AsRef<Path>>(path: P) -> Result<Self> {
        let backend = RedbBackend::open(path).map_err(|e| Error::store_unavailable("open", e))?;
        Ok(Self::custom(backend))
    }

    /// Opens a SQLite-backed ledger file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the database cannot be opened.
    pub fn sqlite<P: AsRef<Path>>(path: P) -> Result<Self> {
        let backend =
            SqliteBackend::open(path).map_err(|e| Error::store_unavailable("open", e))?;
        Ok(Self::custom(backend))
    }

    /// Opens the store described by validated configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a file backend has no path
    /// - [`Error::StoreUnavailable`] if the store cannot be opened
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let backend = config
            .backend
            .ok_or_else(|| Error::Config("store.backend is not set".to_string()))?;

        let ledger = match backend {
            BackendKind::Memory => Self::memory(),
            BackendKind::Redb => Self::redb(required_path(config, backend)?)?,
            BackendKind::Sqlite => Self::sqlite(required_path(config, backend)?)?,
        };

        info!(backend = %backend, "Ledger opened");
        Ok(ledger)
    }

    /// Creates a `Ledger` with a custom backend.
    pub fn custom<B: LedgerBackend>(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Creates a `Ledger` from a shared backend.
    ///
    /// Ledgers built from the same backend see each other's data, but each
    /// one only wakes its own subscribers early; the others notice on their
    /// next poll, like a separate process would.
    pub fn from_arc(backend: Arc<dyn LedgerBackend>) -> Self {
        let (local_writes, _) = watch::channel(0);
        Self {
            backend,
            local_writes: Arc::new(local_writes),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets how often subscribers check the store for outside changes.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Short name of the backing store.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub(crate) fn backend(&self) -> &Arc<dyn LedgerBackend> {
        &self.backend
    }

    pub(crate) fn local_writes(&self) -> watch::Receiver<u64> {
        self.local_writes.subscribe()
    }

    fn notify_local_write(&self) {
        self.local_writes.send_modify(|count| *count += 1);
    }

    /// Reads every source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store fails.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let snapshot = self
            .backend
            .snapshot()
            .await
            .map_err(|e| Error::store_unavailable("snapshot", e))?;
        debug!(
            backend = self.backend.name(),
            revision = snapshot.revision,
            count = snapshot.len(),
            "Snapshot read"
        );
        Ok(snapshot)
    }

    /// Reads one source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store fails.
    pub async fn get(&self, id: &str) -> Result<Option<Source>> {
        self.backend
            .get(id)
            .await
            .map_err(|e| Error::store_unavailable("read", e))
    }

    /// Adds a new unclaimed source.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPath`] if `path` is blank
    /// - [`Error::StoreUnavailable`] if the store fails
    pub async fn insert(&self, path: &str) -> Result<Source> {
        if path.trim().is_empty() {
            return Err(Error::InvalidPath("path cannot be empty".to_string()));
        }
        let source = self
            .backend
            .insert(path)
            .await
            .map_err(|e| Error::store_unavailable("insert", e))?;
        self.notify_local_write();
        info!(id = %source.id, path = %source.path, "Source added");
        Ok(source)
    }

    /// Conditionally replaces the ownership fields of `id`.
    ///
    /// See [`LedgerBackend::compare_and_swap_ownership`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store fails; nothing was
    /// written in that case.
    pub async fn compare_and_swap_ownership(
        &self,
        id: &str,
        expected_owner: &str,
        update: OwnershipUpdate,
    ) -> Result<CasOutcome> {
        let new_owner = update.use_user.clone();
        let outcome = self
            .backend
            .compare_and_swap_ownership(id, expected_owner, update)
            .await
            .map_err(|e| Error::store_unavailable("ownership update", e))?;

        match &outcome {
            CasOutcome::Committed(_) => {
                self.notify_local_write();
                info!(id, from = expected_owner, to = %new_owner, "Ownership changed");
            },
            CasOutcome::Rejected(current) => {
                warn!(
                    id,
                    expected = expected_owner,
                    actual = %current.use_user,
                    "Ownership update lost race"
                );
            },
            CasOutcome::Missing => debug!(id, "Ownership update for missing source"),
        }
        Ok(outcome)
    }

    /// Deletes a source regardless of who holds it.
    ///
    /// Returns `Ok(true)` if the source existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store fails.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let removed = self
            .backend
            .remove(id)
            .await
            .map_err(|e| Error::store_unavailable("delete", e))?;
        if removed {
            self.notify_local_write();
            info!(id, "Source deleted");
        }
        Ok(removed)
    }

    /// Opens a live subscription to full snapshots.
    ///
    /// The first event arrives as soon as the initial snapshot is read.
    /// Must be called inside a tokio runtime.
    pub fn subscribe(&self) -> Subscription {
        Subscription::spawn(self.clone())
    }
}

fn required_path(config: &StoreConfig, backend: BackendKind) -> Result<&Path> {
    config.path.as_deref().ok_or_else(|| {
        Error::Config(format!("store.path is required for the {backend} backend"))
    })
}
