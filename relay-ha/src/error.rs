//! Application-wide error types.

use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Channel provider error during {operation}: {message}")]
    Provider { operation: String, message: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Exhausted: {0}")]
    Exhausted(String),

    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("{0}")]
    Other(String),
}

/// Coarse failure classes used to decide between retry, degrade and abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts and I/O hiccups; the owning loop retries on its next tick.
    Transient,
    /// Needs operator action before a retry can succeed.
    PermissionOrConfig,
    /// Checksum mismatch or corrupted storage.
    Integrity,
    /// No healthy backup left.
    Exhaustion,
    /// The subsystem cannot start.
    Bootstrap,
    Internal,
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn provider(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::Exhausted(msg.into())
    }

    pub fn bootstrap(msg: impl Into<String>) -> Self {
        Self::Bootstrap(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DatabaseSqlx(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Cache(_)
            | Self::Timeout { .. }
            | Self::Provider { .. } => ErrorKind::Transient,
            Self::Validation(_) | Self::Configuration(_) | Self::NotFound { .. } => {
                ErrorKind::PermissionOrConfig
            }
            Self::Integrity(_) | Self::Serialization(_) => ErrorKind::Integrity,
            Self::Exhausted(_) => ErrorKind::Exhaustion,
            Self::Bootstrap(_) | Self::Migration(_) => ErrorKind::Bootstrap,
            Self::InvalidStateTransition { .. } | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is transient and may be retried on the next tick.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
