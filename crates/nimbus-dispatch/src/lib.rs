//! Command/answer dispatch for nimbus.
//!
//! Long-running work (creating a volume, copying a template to a pool) is
//! done by remote agents. The dispatcher turns a request into a command for
//! an agent and the agent's answer back into a state transition:
//!
//! ```text
//! dispatch(record, request)
//!     │  request_event            Creating
//!     ├──────────────────────────────────►  store + bus
//!     │  Command ─────────► agent
//!     │                      │
//!     │  Answer ◄────────────┘  (in-line, via callback, or never)
//!     │  on_success / on_failure  Ready | Error
//!     └──────────────────────────────────►  store + bus
//! ```
//!
//! Each command is resolved exactly once: by its answer, by its timeout
//! (recording the error `"timeout"`), or by a selection or transport
//! failure. Duplicate and late answers are discarded.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod alert;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod selector;
pub mod transport;

pub use alert::{Alert, AlertSink, TracingAlertSink};
pub use dispatcher::{
    AnswerOutcome, CommandOutcome, DispatchHandle, DispatchRequest, Dispatcher, TIMEOUT_ERROR,
};
pub use error::{DispatchError, Result, TransportError};
pub use message::{AgentEndpoint, Answer, AnswerStatus, Command};
pub use selector::{AgentSelector, StaticAgentSelector};
pub use transport::{AgentTransport, HttpAgentTransport, NoopAgentTransport};
