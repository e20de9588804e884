//! Real-time claim and release coordination for shared source paths.
//!
//! Operators register a name, add source paths to a shared ledger, and
//! claim a path before editing it. A claim is a compare-and-set on the
//! record's owner field, so two operators racing for the same free path
//! cannot both win. Every client keeps a live view of the ledger through
//! a [`ledger::Subscription`].
//!
//! - [`ledger`] - records, storage backends and subscriptions
//! - [`identity`] - operator names and the local session
//! - [`ownership`] - claim, release and hand-off rules
//! - [`view`] - display ordering and search
//! - [`config`] / [`paths`] - client configuration

pub mod config;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod ownership;
pub mod paths;
pub mod view;

pub use error::{Error, ErrorKind, Result};
