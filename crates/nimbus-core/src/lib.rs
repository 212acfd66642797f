//! Core types and utilities for nimbus.
//!
//! This crate provides the foundational types used throughout the control plane:
//!
//! - **Identifiers**: resource ids and command correlation ids
//! - **Resource kinds**: the state/event/payload traits every managed
//!   resource type implements, and the versioned [`Record`] it is stored as
//! - **Unit of work**: the thread marker that lets the bus refuse to publish
//!   while row locks are held
//! - **Error types**: common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use nimbus_core::{CorrelationId, ResourceId, state_changed_topic};
//!
//! let id: ResourceId = "42".parse().unwrap();
//! assert_eq!(state_changed_topic("volume", id), "volume.42.stateChanged");
//!
//! let correlation_id = CorrelationId::generate();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod resource;
pub mod unit_of_work;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{CoreError, Result};
pub use ids::{CorrelationId, IdError, ResourceId};
pub use resource::{
    state_changed_topic, AnswerFields, LifecycleEvent, LifecycleState, Record, ResourceKind,
    ResourcePayload, StateChange,
};
