//! Error types for command dispatch.

use nimbus_fsm::EngineError;
use nimbus_store::StoreError;
use thiserror::Error;

/// A result type using `DispatchError`.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors raised while dispatching a command or awaiting its outcome.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No agent could be selected for the resource.
    #[error("no agent available: {0}")]
    AgentUnavailable(String),

    /// The command could not be delivered.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A state transition failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Storage error while recording progress.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The dispatcher went away before the command was resolved.
    #[error("command completion was dropped")]
    CompletionDropped,
}

impl DispatchError {
    /// Returns true if the caller may retry.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::AgentUnavailable(_) => true,
            Self::Transport(e) => e.is_retriable(),
            Self::Engine(e) => e.is_retriable(),
            Self::Store(_) | Self::CompletionDropped => false,
        }
    }
}

/// Errors raised by an [`AgentTransport`](crate::AgentTransport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request never got a response.
    #[error("request failed: {0}")]
    Request(String),

    /// The agent answered with an error status.
    #[error("agent returned {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error message from the agent.
        message: String,
    },

    /// The agent's response could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Network failures and server-side errors are worth retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}
