//! Error types for the storage layer.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("record not found")]
    NotFound,

    /// A record with the same key already exists.
    #[error("record already exists")]
    AlreadyExists,

    /// The admission predicate refused the allocation.
    #[error("allocation refused by admission check")]
    AdmissionDenied,

    /// A mutation was rejected by its caller before being written.
    #[error("mutation rejected: {0}")]
    Rejected(String),

    /// A mutation would have left the aggregate in an invalid state.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}
