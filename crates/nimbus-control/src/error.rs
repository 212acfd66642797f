//! Error types for the control plane.
//!
//! Lower layers keep their own error enums; this one flattens them into
//! the handful of outcomes a caller can act on.

use nimbus_bus::BusError;
use nimbus_core::{CoreError, ResourceId};
use nimbus_dispatch::DispatchError;
use nimbus_fsm::{EngineError, FsmError};
use nimbus_store::StoreError;
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The event is not legal in the resource's current state.
    #[error("{kind} {id}: event {event} is not legal in state {state}")]
    IllegalTransition {
        /// Resource kind.
        kind: &'static str,
        /// Resource id.
        id: ResourceId,
        /// Current state.
        state: String,
        /// Rejected event.
        event: String,
    },

    /// The resource kept changing while we tried to update it.
    #[error("{kind} {id} was modified concurrently")]
    Conflict {
        /// Resource kind.
        kind: &'static str,
        /// Resource id.
        id: ResourceId,
    },

    /// No resource kind goes by this name.
    #[error("unknown resource kind: {0}")]
    UnknownKind(String),

    /// The command could not be handed to an agent.
    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    /// Lookup or identifier error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Subscription error.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// A transition table could not be built.
    #[error("invalid state machine: {0}")]
    Machine(#[from] FsmError),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::Core(CoreError::ResourceNotFound { .. }) | Self::UnknownKind(_) => 404,
            Self::Core(CoreError::InvalidId(_)) | Self::Bus(BusError::InvalidTopic(_)) => 400,
            Self::IllegalTransition { .. } | Self::Conflict { .. } => 409,
            Self::DispatchFailed(_) => 502,
            Self::Core(CoreError::Internal(_))
            | Self::Bus(BusError::PublishInUnitOfWork { .. })
            | Self::Machine(_)
            | Self::Store(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::DispatchFailed(_) | Self::Store(_)
        )
    }
}

impl From<EngineError> for ControlError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::IllegalTransition {
                kind,
                id,
                state,
                event,
            } => Self::IllegalTransition {
                kind,
                id,
                state,
                event,
            },
            EngineError::ConcurrentModification { kind, id, .. } => Self::Conflict { kind, id },
            EngineError::NotFound { kind, id } => {
                Self::Core(CoreError::ResourceNotFound { kind, id })
            }
            EngineError::Store(e) => Self::Store(e),
        }
    }
}

impl From<DispatchError> for ControlError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Engine(e) => e.into(),
            DispatchError::Store(e) => Self::Store(e),
            DispatchError::CompletionDropped => Self::Internal(err.to_string()),
            DispatchError::AgentUnavailable(_) | DispatchError::Transport(_) => {
                Self::DispatchFailed(err.to_string())
            }
        }
    }
}
