//! Error types for the Quarry library.
//!
//! All fallible operations return [`QuarryError`]. The variants follow the
//! engine's error taxonomy:
//!
//! - **not found**: [`QuarryError::IndexNotFound`], [`QuarryError::DocumentNotFound`].
//!   Absent storage keys are not errors at all; they surface as `Option::None`.
//! - **malformed input**: [`QuarryError::EmptyKey`], [`QuarryError::KeyValueMismatch`],
//!   [`QuarryError::BulkFormat`], [`QuarryError::InvalidArgument`], [`QuarryError::Json`].
//!   These are rejected before any state is mutated.
//! - **storage faults**: [`QuarryError::Io`], [`QuarryError::Storage`],
//!   [`QuarryError::Corrupted`], [`QuarryError::StorageClosed`],
//!   [`QuarryError::Serialization`]. They are propagated unmodified; no layer retries.
//! - **preconditions**: [`QuarryError::IndexAlreadyExists`], [`QuarryError::CloneSameName`],
//!   [`QuarryError::CloneUnsupported`], [`QuarryError::IndexClosed`].
//!
//! Search timeouts are never errors; they are reported through
//! [`crate::search::SearchResult::timed_out`].
//!
//! # Examples
//!
//! ```
//! use quarry::error::{QuarryError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(QuarryError::invalid_argument("shard count must be positive"))
//! }
//!
//! assert!(example_operation().is_err());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Quarry operations.
#[derive(Error, Debug)]
pub enum QuarryError {
    /// I/O errors from the underlying database files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A database file failed its checksum or could not be decoded.
    #[error("Corrupted data: {0}")]
    Corrupted(String),

    /// The backend (or the worker pool in front of it) was already closed.
    #[error("Storage is closed")]
    StorageClosed,

    /// Keys must not be empty.
    #[error("Key cannot be empty")]
    EmptyKey,

    /// A batch call received a different number of keys and values.
    #[error("Keys and values not match: {keys} keys, {values} values")]
    KeyValueMismatch { keys: usize, values: usize },

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    /// The index exists but its storage handles are not open.
    #[error("Index is closed: {0}")]
    IndexClosed(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Cloned index name is same as origin: {0}")]
    CloneSameName(String),

    #[error("Clone not supported: {0}")]
    CloneUnsupported(String),

    /// A line of a newline-delimited bulk body could not be understood.
    #[error("Bulk data format error at line {line}: {message}")]
    BulkFormat { line: usize, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Binary (bincode) serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A background worker failed or could not be reached.
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Result type alias for operations that may fail with QuarryError.
pub type Result<T> = std::result::Result<T, QuarryError>;

impl QuarryError {
    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        QuarryError::Storage(msg.into())
    }

    /// Create a new corruption error.
    pub fn corrupted<S: Into<String>>(msg: S) -> Self {
        QuarryError::Corrupted(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        QuarryError::InvalidArgument(msg.into())
    }

    /// Create a new bulk format error for the given (1-based) line.
    pub fn bulk_format<S: Into<String>>(line: usize, msg: S) -> Self {
        QuarryError::BulkFormat {
            line,
            message: msg.into(),
        }
    }

    /// Create a new worker error.
    pub fn worker<S: Into<String>>(msg: S) -> Self {
        QuarryError::Worker(msg.into())
    }

    /// Whether this error means "the thing asked for does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            QuarryError::IndexNotFound(_) | QuarryError::DocumentNotFound(_)
        )
    }

    /// Whether this error was caused by the caller's input rather than by the engine.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            QuarryError::EmptyKey
                | QuarryError::KeyValueMismatch { .. }
                | QuarryError::BulkFormat { .. }
                | QuarryError::InvalidArgument(_)
                | QuarryError::Json(_)
        )
    }

    /// HTTP-style status class for this error: 404 for not-found conditions,
    /// 400 for malformed input and failed preconditions, 500 otherwise.
    pub fn status_code(&self) -> u16 {
        if self.is_not_found() {
            404
        } else if self.is_malformed_input()
            || matches!(
                self,
                QuarryError::IndexAlreadyExists(_)
                    | QuarryError::CloneSameName(_)
                    | QuarryError::CloneUnsupported(_)
            )
        {
            400
        } else {
            500
        }
    }
}

impl From<bincode::Error> for QuarryError {
    fn from(err: bincode::Error) -> Self {
        QuarryError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = QuarryError::storage("disk full");
        assert_eq!(error.to_string(), "Storage error: disk full");

        let error = QuarryError::KeyValueMismatch { keys: 2, values: 1 };
        assert_eq!(
            error.to_string(),
            "Keys and values not match: 2 keys, 1 values"
        );

        let error = QuarryError::bulk_format(3, "expected an action line");
        assert_eq!(
            error.to_string(),
            "Bulk data format error at line 3: expected an action line"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let quarry_error = QuarryError::from(io_error);

        match quarry_error {
            QuarryError::Io(_) => {}
            _ => panic!("Expected IO error variant"),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(QuarryError::IndexNotFound("a".into()).status_code(), 404);
        assert_eq!(QuarryError::DocumentNotFound("1".into()).status_code(), 404);
        assert_eq!(QuarryError::EmptyKey.status_code(), 400);
        assert_eq!(QuarryError::IndexAlreadyExists("a".into()).status_code(), 400);
        assert_eq!(QuarryError::storage("boom").status_code(), 500);
        assert_eq!(QuarryError::StorageClosed.status_code(), 500);
    }
}
