//! Common error types for nimbus.
//!
//! This module provides shared error types that are used across multiple crates.

use crate::ids::ResourceId;
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the nimbus system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A resource with the specified ID was not found.
    #[error("{kind} not found: {id}")]
    ResourceNotFound {
        /// Resource kind name.
        kind: &'static str,
        /// The missing resource.
        id: ResourceId,
    },

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
