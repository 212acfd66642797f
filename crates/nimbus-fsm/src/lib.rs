//! Lifecycle state machines for nimbus resources.
//!
//! Each resource kind declares its legal moves once, as a table of
//! `(from, event) -> to` edges. The [`Engine`] is the only way a resource
//! changes state: it validates the event against the table, persists the
//! move through the store's compare-and-swap and publishes
//! `{kind}.{id}.stateChanged` on the bus.
//!
//! # Example
//!
//! ```ignore
//! let machine = StateMachine::<SharedFs>::builder()
//!     .transition(Stopped, StartRequested, Starting)
//!     .transition(Starting, OperationSucceeded, Ready)
//!     .transition(Starting, OperationFailed, Stopped)
//!     .build()?;
//!
//! let engine = Engine::new(Arc::new(machine), store, bus);
//! let record = engine.request_transition(id, StartRequested)?;
//! assert_eq!(record.state, Starting);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod engine;
pub mod error;
pub mod machine;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use engine::{Engine, DEFAULT_CONFLICT_RETRIES, ENGINE_SENDER};
pub use error::{EngineError, FsmError, Result};
pub use machine::{Guard, StateMachine, StateMachineBuilder, Transition};
