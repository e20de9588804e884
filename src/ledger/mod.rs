//! The source ledger: a shared, subscribable list of claimable records.
//!
//! Every backend implements the same compare-and-set capability:
//!
//! - **SqliteBackend**: version column plus conditional `UPDATE`; safe for
//!   several processes sharing one database file (default)
//! - **RedbBackend**: serialized write transactions; one process at a time
//! - **MemoryBackend**: DashMap, non-persistent (tests and embedding)
//!
//! # Example
//!
//! ```ignore
//! use sourcelock::ledger::{Ledger, OwnershipUpdate, RootPath, source_path};
//!
//! let ledger = Ledger::sqlite("/shared/ledger.db")?;
//! let source = ledger.insert(&source_path(RootPath::Www, "test.php")?).await?;
//! let update = OwnershipUpdate::claim(&source, "alice", chrono::Utc::now());
//! let outcome = ledger.compare_and_swap_ownership(&source.id, "", update).await?;
//! assert!(outcome.is_committed());
//! ```
//!
//! # Custom Backends
//!
//! Implement the `LedgerBackend` trait to use another store:
//!
//! ```ignore
//! struct PostgresBackend { /* ... */ }
//! impl LedgerBackend for PostgresBackend { /* ... */ }
//!
//! let ledger = Ledger::custom(PostgresBackend::new());
//! ```

mod backend;
mod memory;
mod redb;
mod sqlite;
mod store;
mod subscription;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::LedgerBackend;
pub use memory::MemoryBackend;
pub use redb::RedbBackend;
pub use sqlite::SqliteBackend;
pub use store::{DEFAULT_POLL_INTERVAL, Ledger};
pub use subscription::{LedgerEvent, Subscription};
pub use types::{
    CasOutcome, OwnershipUpdate, RESERVED_KEY_CHARS, RootPath, Snapshot, Source, source_path,
};
