//! Control plane for nimbus storage resources.
//!
//! This crate wires the lifecycle engine, the versioned store, the command
//! dispatcher and the message bus together for each resource kind, and
//! exposes the result over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              HTTP (answers from agents, lookups)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ControlPlane                         │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │   Volume    │ │  SharedFs   │ │    TemplateCopy     │    │
//! │  │   service   │ │  service    │ │    service          │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │  Store   │   │   Bus    │   │  Agents  │
//!        │ (RocksDB)│   │ (topics) │   │  (HTTP)  │
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use nimbus_control::{ControlConfig, ControlPlane, VolumeState, VolumePayload};
//! use nimbus_dispatch::{AgentEndpoint, HttpAgentTransport, StaticAgentSelector, TracingAlertSink};
//! use nimbus_store::RocksStore;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ControlConfig::default();
//! let control = ControlPlane::new(
//!     Arc::new(RocksStore::open("/tmp/nimbus")?),
//!     Arc::new(HttpAgentTransport::new(config.agent_request_timeout())?),
//!     Arc::new(StaticAgentSelector::new(AgentEndpoint::new("http://agent:8250"))),
//!     Arc::new(TracingAlertSink),
//!     config,
//! )?;
//!
//! let volume = control
//!     .volumes()
//!     .create(VolumeState::Allocated, VolumePayload::default())?;
//! println!("Created volume {}", volume.id);
//! # Ok(())
//! # }
//! ```
//!
//! # Recovery
//!
//! Pending commands live in memory. A resource left in a transitional state
//! by a restart is moved through its kind's recovery event by the
//! [`Reconciler`] once it has been idle for `stuck_after_seconds`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod error;
pub mod kinds;
pub mod reconciler;
pub mod service;
pub mod types;
pub mod usage;

pub use api::{create_router, ApiError, AppState};
pub use error::{ControlError, Result};
pub use kinds::{
    SharedFs, SharedFsEvent, SharedFsPayload, SharedFsState, TemplateCopy, TemplateEvent,
    TemplatePayload, TemplateState, Volume, VolumeEvent, VolumePayload, VolumeState,
};
pub use reconciler::Reconciler;
pub use service::{ControlPlane, ResourceService};
pub use types::ControlConfig;
pub use usage::{UsageRecorder, USAGE_TOPIC};
