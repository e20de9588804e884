//! Operator identities.
//!
//! An identity is keyed by the operator's normalized name, so uniqueness is
//! a property of the store key rather than a check made before writing.
//! Logging in either creates the identity or, for a returning operator,
//! re-activates it in place. Nothing ever deletes an identity; logging out
//! only forgets the client-local [`Session`].

mod session;

pub use session::{Session, SessionCache};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ledger::{Ledger, RESERVED_KEY_CHARS};

/// Shortest accepted name, in characters.
pub const MIN_NAME_LEN: usize = 2;

/// Longest accepted name, in characters.
pub const MAX_NAME_LEN: usize = 20;

/// A registered operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub name: String,
    pub is_active: bool,
    /// Milliseconds since the Unix epoch.
    pub login_at: i64,
}

impl Identity {
    pub(crate) fn active(name: &str, login_at: i64) -> Self {
        Self {
            name: name.to_string(),
            is_active: true,
            login_at,
        }
    }
}

/// What happens when a name that already exists logs in again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReentryPolicy {
    /// Treat it as the same operator returning (last writer wins).
    #[default]
    Reactivate,
    /// Refuse the login with [`Error::NameTaken`].
    Reject,
}

/// Result of a single create-or-reactivate mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    Created(Identity),
    Reactivated(Identity),
    /// The name exists and the policy refuses re-entry.
    Taken,
}

impl IdentityOutcome {
    /// The stored identity, unless the login was refused.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Created(identity) | Self::Reactivated(identity) => Some(identity),
            Self::Taken => None,
        }
    }
}

/// Trim and validate an operator name.
///
/// Checks, in order: empty after trimming, length outside
/// [`MIN_NAME_LEN`]..=[`MAX_NAME_LEN`] characters, reserved key characters.
///
/// # Errors
///
/// Returns [`Error::InvalidName`] describing the first failed check.
pub fn validate_name(raw: &str) -> Result<String> {
    let name = raw.trim();

    if name.is_empty() {
        return Err(Error::invalid_name(name, "name cannot be empty"));
    }

    let len = name.chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        return Err(Error::invalid_name(
            name,
            format!("must be {MIN_NAME_LEN}-{MAX_NAME_LEN} characters (got {len})"),
        ));
    }

    if let Some(bad) = name.chars().find(|c| RESERVED_KEY_CHARS.contains(c)) {
        return Err(Error::invalid_name(
            name,
            format!("cannot contain '{bad}' (reserved: . $ # [ ] /)"),
        ));
    }

    Ok(name.to_string())
}

/// Registry of operator identities over a ledger store.
#[derive(Clone)]
pub struct IdentityRegistry {
    ledger: Ledger,
    policy: ReentryPolicy,
}

impl IdentityRegistry {
    pub fn new(ledger: Ledger, policy: ReentryPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn policy(&self) -> ReentryPolicy {
        self.policy
    }

    /// Validate `name` and register it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidName`] if validation fails (nothing is written)
    /// - [`Error::NameTaken`] if the name exists and the policy is
    ///   [`ReentryPolicy::Reject`]
    /// - [`Error::StoreUnavailable`] if the store fails
    pub async fn claim_identity(&self, name: &str) -> Result<Identity> {
        let name = validate_name(name)?;
        let login_at = Utc::now().timestamp_millis();

        let outcome = self
            .ledger
            .backend()
            .upsert_identity(&name, login_at, self.policy)
            .await
            .map_err(|e| Error::store_unavailable("login", e))?;

        match outcome {
            IdentityOutcome::Created(identity) => {
                info!(user = %identity.name, "Identity created");
                Ok(identity)
            },
            IdentityOutcome::Reactivated(identity) => {
                info!(user = %identity.name, "Identity reactivated");
                Ok(identity)
            },
            IdentityOutcome::Taken => {
                debug!(user = %name, "Identity refused, name already registered");
                Err(Error::NameTaken { name })
            },
        }
    }

    /// Look up a registered identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store fails.
    pub async fn get(&self, name: &str) -> Result<Option<Identity>> {
        self.ledger
            .backend()
            .get_identity(name)
            .await
            .map_err(|e| Error::store_unavailable("identity lookup", e))
    }
}
