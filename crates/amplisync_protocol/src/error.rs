//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding server payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The body is not a valid DEFLATE (or zlib) stream.
    #[error("failed to inflate body: {0}")]
    Inflate(std::io::Error),

    /// The inflated body is not UTF-8.
    #[error("body is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The body is not the expected JSON shape.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A batch carries records that cannot be applied.
    #[error("invalid records in batch {sync_id}: {message}")]
    InvalidRecords {
        /// Batch cursor.
        sync_id: String,
        /// What is wrong with the records.
        message: String,
    },
}
