//! Error types for the state machine engine.

use nimbus_core::ResourceId;
use nimbus_store::StoreError;
use thiserror::Error;

/// A result type using `EngineError`.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while building a transition table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsmError {
    /// Two transitions were registered for the same `(from, event)` pair.
    #[error("{kind}: duplicate transition from {from} on {event}")]
    DuplicateTransition {
        /// Resource kind.
        kind: &'static str,
        /// Source state.
        from: String,
        /// Triggering event.
        event: String,
    },
}

/// Errors raised while applying an event to a resource.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No transition is defined for the event from the current state, or its
    /// guard rejected it.
    #[error("{kind} {id}: event {event} is not legal in state {state}")]
    IllegalTransition {
        /// Resource kind.
        kind: &'static str,
        /// Resource id.
        id: ResourceId,
        /// State the resource was in.
        state: String,
        /// Rejected event.
        event: String,
    },

    /// The resource kept changing underneath us until retries ran out.
    #[error("{kind} {id}: concurrent modification after {attempts} attempts")]
    ConcurrentModification {
        /// Resource kind.
        kind: &'static str,
        /// Resource id.
        id: ResourceId,
        /// Number of compare-and-swap attempts made.
        attempts: u32,
    },

    /// The resource does not exist (or was deleted mid-transition).
    #[error("{kind} {id} not found")]
    NotFound {
        /// Resource kind.
        kind: &'static str,
        /// Resource id.
        id: ResourceId,
    },

    /// Storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Returns true if the caller may retry the request against fresh state.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}
