use std::{borrow::Cow, path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures raised while checking or provisioning the backing table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The table is missing (or has the wrong key layout) and creation was not allowed.
    #[error("Table creation not allowed, but not created or wrongly created for table '{table}'")]
    CreationNotAllowed { table: String },
}

impl SchemaError {
    pub fn creation_not_allowed(table: impl Into<String>) -> Self {
        Self::CreationNotAllowed { table: table.into() }
    }
}

/// Top-level error type returned by the change-entry repository.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Schema check failed; propagated unchanged from the provisioner.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A data operation ran before the table reached the ready state.
    #[error("change entry table '{table}' is not initialized")]
    NotInitialized { table: String },

    /// The caller's deadline expired before the backend answered.
    #[error("{operation} on table '{table}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        table: String,
        after: Duration,
    },

    /// Transient backend failure; the caller may retry.
    #[error("backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// Non-transient backend failure.
    #[error("backend error: {message}")]
    Backend { message: String },

    /// A stored record could not be decoded, or an input entry is unusable.
    #[error("invalid change entry: {message}")]
    InvalidEntry { message: Cow<'static, str> },

    /// Table names must be 3..=255 characters of `[A-Za-z0-9_.-]`.
    #[error("invalid table name '{table}'")]
    InvalidTableName { table: String },
}

impl RepoError {
    pub fn not_initialized(table: impl Into<String>) -> Self {
        Self::NotInitialized { table: table.into() }
    }

    pub fn invalid_entry(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidEntry {
            message: message.into(),
        }
    }

    /// Whether the failure is worth retrying from the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. } | Self::Timeout { .. })
    }
}

/// Failures acquiring, refreshing or releasing the migration lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another owner holds an unexpired lock.
    #[error("lock '{key}' is held by '{owner}' until {until}")]
    HeldByOther {
        key: String,
        owner: String,
        until: DateTime<Utc>,
    },

    #[error("gave up acquiring lock '{key}' after {after:?}")]
    QuitTrying { key: String, after: Duration },

    /// The manager was released; it cannot acquire or refresh again.
    #[error("lock '{key}' cannot be used after being released")]
    Released { key: String },

    /// The stored lock no longer belongs to this owner.
    #[error("lock '{key}' is no longer held by this owner")]
    Lost { key: String },

    #[error("invalid lock record: {message}")]
    InvalidRecord { message: String },

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl LockError {
    /// Whether the failure is worth retrying while acquiring.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HeldByOther { .. } => true,
            Self::Repo(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<StoreError> for LockError {
    fn from(err: StoreError) -> Self {
        Self::Repo(err.into())
    }
}

/// Failures loading or resolving a [`LedgerConfig`](crate::config::LedgerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {0} not set")]
    MissingEnv(String),

    #[error("invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Errors surfaced by a [`KeyValueStore`](crate::store::KeyValueStore) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("table '{0}' already exists")]
    TableAlreadyExists(String),

    /// The put condition did not hold against the stored item.
    #[error("conditional check failed")]
    ConditionFailed,

    /// Network, throttling or other transient failure.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Backend(String),

    /// Stored bytes could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
            || matches!(
                err.kind(),
                redis::ErrorKind::BusyLoadingError | redis::ErrorKind::TryAgain | redis::ErrorKind::ClusterDown
            )
        {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

impl From<StoreError> for RepoError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TableNotFound(table) => RepoError::NotInitialized { table },
            StoreError::Unavailable(message) => RepoError::BackendUnavailable { message },
            StoreError::Codec(message) => RepoError::InvalidEntry { message: message.into() },
            other => RepoError::Backend {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_not_allowed_names_the_table() {
        let err = SchemaError::creation_not_allowed("for-initialize-1");
        let message = err.to_string();
        assert!(message.starts_with("Table creation not allowed, but not created or wrongly created for table"));
        assert!(message.contains("for-initialize-1"));
    }

    #[test]
    fn schema_error_passes_through_repo_error_unchanged() {
        let err: RepoError = SchemaError::creation_not_allowed("ledger").into();
        assert_eq!(err.to_string(), SchemaError::creation_not_allowed("ledger").to_string());
        assert!(matches!(err, RepoError::Schema(SchemaError::CreationNotAllowed { .. })));
    }

    #[test]
    fn store_errors_map_onto_taxonomy() {
        assert!(matches!(
            RepoError::from(StoreError::TableNotFound("t".into())),
            RepoError::NotInitialized { table } if table == "t"
        ));
        assert!(matches!(
            RepoError::from(StoreError::unavailable("throttled")),
            RepoError::BackendUnavailable { .. }
        ));
        assert!(matches!(RepoError::from(StoreError::codec("bad json")), RepoError::InvalidEntry { .. }));
        assert!(matches!(RepoError::from(StoreError::ConditionFailed), RepoError::Backend { .. }));
    }

    #[test]
    fn lock_errors_wrap_store_failures() {
        let err = LockError::from(StoreError::unavailable("reset"));
        assert!(matches!(err, LockError::Repo(RepoError::BackendUnavailable { .. })));
        assert!(err.is_retryable());
        assert!(!LockError::Lost { key: "k".into() }.is_retryable());
        assert!(
            LockError::HeldByOther {
                key: "k".into(),
                owner: "other".into(),
                until: Utc::now(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(RepoError::BackendUnavailable { message: "x".into() }.is_retryable());
        assert!(
            RepoError::Timeout {
                operation: "scan",
                table: "t".into(),
                after: Duration::from_millis(5)
            }
            .is_retryable()
        );
        assert!(!RepoError::not_initialized("t").is_retryable());
        assert!(!RepoError::from(SchemaError::creation_not_allowed("t")).is_retryable());
    }
}
