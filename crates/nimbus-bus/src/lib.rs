//! Hierarchical publish/subscribe bus for nimbus.
//!
//! Components announce state changes on dot-delimited topics such as
//! `volume.123.stateChanged` without knowing who listens. A subscriber on a
//! prefix (`volume`) also receives everything published beneath it.
//!
//! # Delivery order
//!
//! ```text
//! publish("a.b.c")
//!     │
//!     ├─► subscribers of a.b.c
//!     ├─► subscribers of a.b
//!     ├─► subscribers of a
//!     └─► subscribers of the root ("")
//! ```
//!
//! # Reentrancy
//!
//! A single gate serializes access to the subscription tree. The thread that
//! owns the gate can publish or subscribe again from inside a callback.
//! Other threads block on `publish` and have their subscription changes
//! queued until the gate is released.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use nimbus_bus::{FnSubscriber, MessageBus};
//! use serde_json::{json, Value};
//!
//! let bus = MessageBus::new();
//! bus.subscribe("volume", Arc::new(FnSubscriber::new(|_: &str, topic: &str, _: &Value| {
//!     println!("saw {topic}");
//! }))).unwrap();
//!
//! let delivered = bus.publish("engine", "volume.7.stateChanged", &json!({})).unwrap();
//! assert_eq!(delivered, 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bus;
pub mod error;
mod gate;
mod node;
pub mod subscriber;

pub use bus::MessageBus;
pub use error::{BusError, Result};
pub use subscriber::{FnSubscriber, Subscriber, SubscriptionId};
