//! Error types for the sync engine.

use amplisync_protocol::ProtocolError;
use amplisync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// The engine never retries on its own; [`SyncError::is_retryable`] only
/// advises the caller.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network failure or non-success HTTP status.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// HTTP status, when the server answered.
        status: Option<u16>,
    },

    /// A pull body could not be inflated, decoded or parsed.
    #[error("failed to decode batch for table {table}: {source}")]
    Decode {
        /// Table whose batch was being decoded.
        table: String,
        /// Underlying protocol error.
        #[source]
        source: ProtocolError,
    },

    /// A server response other than a pull body had an unexpected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A schema migration failed to execute.
    #[error("migration {migration_id} failed: {message}")]
    Schema {
        /// Id of the failing migration.
        migration_id: String,
        /// Error reported by SQLite.
        message: String,
    },

    /// Local database error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Missing or unusable session.
    #[error("session error: {0}")]
    Session(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bootstrap snapshot could not be unpacked.
    #[error("snapshot archive error: {0}")]
    Archive(String),

    /// No local database connection is open.
    #[error("database is not connected")]
    NotConnected,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a transport error for a failed network call.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Creates a transport error for a non-success status.
    pub fn status(label: &str, status: u16) -> Self {
        Self::Transport {
            message: format!("{label} failed: {status}"),
            status: Some(status),
        }
    }

    /// Returns true if repeating the whole operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { status: None, .. } => true,
            SyncError::Transport {
                status: Some(code), ..
            } => *code >= 500 || *code == 408 || *code == 429,
            SyncError::Storage(err) => !err.is_constraint_violation(),
            SyncError::Io(_) => true,
            _ => false,
        }
    }
}

impl From<zip::result::ZipError> for SyncError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => SyncError::Io(io),
            other => SyncError::Archive(other.to_string()),
        }
    }
}
