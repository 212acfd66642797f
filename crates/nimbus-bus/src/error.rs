//! Error types for the message bus.

use thiserror::Error;

/// A result type using `BusError`.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur when using the message bus.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// The topic has an empty segment (leading, trailing or doubled dot).
    #[error("invalid topic: {0:?}")]
    InvalidTopic(String),

    /// `publish` was called while the thread holds an open unit of work.
    #[error("cannot publish {topic:?} while a unit of work is open")]
    PublishInUnitOfWork {
        /// The topic that was being published.
        topic: String,
    },
}
