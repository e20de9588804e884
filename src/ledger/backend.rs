//! Backend trait for the source ledger.
//!
//! Defines the compare-and-set capability every store must provide so the
//! ownership rules never depend on a particular database's transaction API.

use anyhow::Result;
use async_trait::async_trait;

use super::types::{CasOutcome, OwnershipUpdate, Snapshot, Source};
use crate::identity::{Identity, IdentityOutcome, ReentryPolicy};

/// Storage backend for sources and identities.
///
/// All backends must be thread-safe (`Send + Sync`) for use with tokio.
/// Every method is a single atomic operation against the store; nothing in
/// this trait spans more than one record.
///
/// # Example
///
/// ```ignore
/// use sourcelock::ledger::{LedgerBackend, MemoryBackend};
///
/// let backend = MemoryBackend::new();
/// let source = backend.insert("/www/test.php").await?;
/// let update = OwnershipUpdate::claim(&source, "alice", Utc::now());
/// let outcome = backend.compare_and_swap_ownership(&source.id, "", update).await?;
/// assert!(outcome.is_committed());
/// ```
#[async_trait]
pub trait LedgerBackend: Send + Sync + 'static {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Reads every source along with the store's change revision.
    ///
    /// The revision increases whenever a source is inserted, removed, or has
    /// its ownership changed. Two snapshots with the same revision contain
    /// the same records.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    async fn snapshot(&self) -> Result<Snapshot>;

    /// Returns the current change revision without reading any records.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    async fn revision(&self) -> Result<u64>;

    /// Retrieves a single source.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    async fn get(&self, id: &str) -> Result<Option<Source>>;

    /// Stores a new unclaimed source under a freshly generated id.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    async fn insert(&self, path: &str) -> Result<Source>;

    /// Writes `update` only if the stored `use_user` equals `expected_owner`
    /// and the stored version still equals `update.base_version`.
    ///
    /// An empty `expected_owner` means "currently unclaimed". A committed
    /// write stores version `base_version + 1`. When several
    /// callers race with the same expectation exactly one observes
    /// [`CasOutcome::Committed`]; the others get [`CasOutcome::Rejected`] and
    /// the stored record is left as the winner wrote it.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails. A failed
    /// write never leaves a partial update behind.
    async fn compare_and_swap_ownership(
        &self,
        id: &str,
        expected_owner: &str,
        update: OwnershipUpdate,
    ) -> Result<CasOutcome>;

    /// Deletes a source regardless of who holds it.
    ///
    /// Returns `Ok(true)` if the source existed and was removed,
    /// `Ok(false)` if it didn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    async fn remove(&self, id: &str) -> Result<bool>;

    /// Creates the identity keyed by `name`, or handles an existing one
    /// according to `policy`, in a single conditional mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    async fn upsert_identity(
        &self,
        name: &str,
        login_at: i64,
        policy: ReentryPolicy,
    ) -> Result<IdentityOutcome>;

    /// Retrieves an identity by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    async fn get_identity(&self, name: &str) -> Result<Option<Identity>>;
}
