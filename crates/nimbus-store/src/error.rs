//! Error types for the storage layer.

use nimbus_core::ResourceId;
use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
///
/// A compare-and-swap that loses a race is not an error: it reports zero
/// rows affected.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unit of work returned an update for a row it did not lock.
    #[error("row {0} is not part of the locked set")]
    RowNotLocked(ResourceId),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}
