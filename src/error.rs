//! Typed errors for ledger, identity and ownership operations.
//!
//! Every failure a caller can react to has its own variant. Variants are
//! grouped into an [`ErrorKind`] so the CLI can decide how to present them:
//! validation problems never touch the store, conflicts name the current
//! holder, and store failures are reported as retryable.

/// Result type for sourcelock operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad user input; no mutation was attempted.
    Validation,
    /// A conditional write did not commit or a policy refused the request.
    Conflict,
    /// The referenced record does not exist.
    NotFound,
    /// No operator is logged in.
    Session,
    /// The backing store could not be reached or failed mid-operation.
    Unavailable,
    /// Startup configuration is missing or invalid.
    Config,
}

/// Errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Operator name failed validation.
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Source path failed validation.
    #[error("invalid source path: {0}")]
    InvalidPath(String),

    /// The name is already registered and the registry rejects re-entry.
    #[error("name '{name}' is already in use")]
    NameTaken { name: String },

    /// The source is claimed by someone else.
    #[error("{path} is in use by {owner}")]
    Busy { id: String, path: String, owner: String },

    /// The record changed between the read and the conditional write.
    #[error("source {id} was changed concurrently, refresh and try again")]
    Conflict { id: String },

    /// A release or hand-off was requested by someone who does not hold the claim.
    #[error("{user} does not hold {path}")]
    NotHolder { id: String, path: String, user: String },

    /// No source with this id exists.
    #[error("source not found: {id}")]
    SourceNotFound { id: String },

    /// The operation requires a logged-in operator.
    #[error("not logged in, run `sourcelock login <name>` first")]
    NotLoggedIn,

    /// Backing store failure.
    #[error("store unavailable during {operation}: {source}")]
    StoreUnavailable {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an invalid name error.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a backend failure for the named operation.
    pub fn store_unavailable(operation: &'static str, source: anyhow::Error) -> Self {
        Self::StoreUnavailable { operation, source }
    }

    /// Create a not found error.
    pub fn source_not_found(id: impl Into<String>) -> Self {
        Self::SourceNotFound { id: id.into() }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName { .. } | Self::InvalidPath(_) => ErrorKind::Validation,
            Self::NameTaken { .. }
            | Self::Busy { .. }
            | Self::Conflict { .. }
            | Self::NotHolder { .. } => ErrorKind::Conflict,
            Self::SourceNotFound { .. } => ErrorKind::NotFound,
            Self::NotLoggedIn => ErrorKind::Session,
            Self::StoreUnavailable { .. } => ErrorKind::Unavailable,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether repeating the same request later might succeed.
    ///
    /// Only store failures qualify. Conflicts need a fresh read first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// The name of whoever holds the record, if this error is about one.
    pub fn holder(&self) -> Option<&str> {
        match self {
            Self::Busy { owner, .. } => Some(owner),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            Error::invalid_name("a", "too short").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::Busy {
                id: "1".into(),
                path: "/www/a".into(),
                owner: "alice".into(),
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(Error::source_not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::NotLoggedIn.kind(), ErrorKind::Session);
    }

    #[test]
    fn test_only_store_errors_are_retryable() {
        let err = Error::store_unavailable("insert", anyhow::anyhow!("disk I/O error"));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.to_string().contains("insert"));

        assert!(!Error::Conflict { id: "1".into() }.is_retryable());
        assert!(!Error::NotLoggedIn.is_retryable());
    }

    #[test]
    fn test_busy_names_holder() {
        let err = Error::Busy {
            id: "1".into(),
            path: "/www/test.php".into(),
            owner: "alice".into(),
        };
        assert_eq!(err.holder(), Some("alice"));
        assert_eq!(err.to_string(), "/www/test.php is in use by alice");
    }
}
