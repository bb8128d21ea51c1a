//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The SQLite engine rejected a statement or failed to open the database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A named statement parameter had no value in the supplied record.
    #[error("no value for parameter {name} in statement: {sql}")]
    MissingParameter {
        /// The parameter name as written in the statement.
        name: String,
        /// The statement text.
        sql: String,
    },

    /// The number of positional values differs from the statement's parameters.
    #[error("statement expects {expected} parameters but {actual} were given: {sql}")]
    ParameterCount {
        /// Number of parameters in the statement.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
        /// The statement text.
        sql: String,
    },

    /// A script opened a transaction and returned without ending it.
    #[error("script left a transaction open; it was rolled back")]
    UnterminatedTransaction,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

impl StorageError {
    /// Returns true if the underlying SQLite error is a constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
