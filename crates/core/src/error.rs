//! Error type shared by the storage engine and the index.
//!
//! Every failure is returned to the caller; nothing is retried or repaired
//! automatically. A failure inside a write transaction aborts it.

use std::io;

/// Errors produced by vptree-core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure from the write-ahead log or snapshot files.
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    /// A stored record, WAL frame, or snapshot failed to decode.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// No node is stored under the requested id.
    #[error("node {id} not found in bucket '{bucket}'")]
    NotFound { bucket: String, id: u64 },

    /// The named bucket does not exist.
    #[error("bucket '{0}' not found")]
    BucketNotFound(String),

    /// A database or bucket with this name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Two vectors (or a vector and the index) disagree on dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A feature vector has components the processor does not accept.
    #[error("invalid vector: {0}")]
    InvalidVector(String),

    /// A tree or configuration invariant does not hold.
    #[error("invalid: {0}")]
    Invalid(String),

    /// bincode failed to serialize or deserialize engine metadata.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type for vptree-core operations.
pub type Result<T> = std::result::Result<T, Error>;
