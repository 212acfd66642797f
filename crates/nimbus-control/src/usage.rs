//! Usage events for billing.
//!
//! The recorder listens on the root topic and emits a usage event whenever
//! a resource comes to rest. It never blocks the publisher.

use std::sync::atomic::{AtomicU64, Ordering};

use nimbus_bus::Subscriber;
use nimbus_core::StateChange;
use serde_json::Value;
use tracing::{debug, info};

/// Topic the recorder subscribes to: the root, so it sees every kind.
pub const USAGE_TOPIC: &str = "";

/// Emits a `nimbus::usage` event for every settled state change.
#[derive(Debug, Default)]
pub struct UsageRecorder {
    recorded: AtomicU64,
}

impl UsageRecorder {
    /// Create a recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            recorded: AtomicU64::new(0),
        }
    }

    /// Number of usage events emitted so far.
    #[must_use]
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }
}

impl Subscriber for UsageRecorder {
    fn on_message(&self, sender: &str, topic: &str, payload: &Value) {
        let change: StateChange = match serde_json::from_value(payload.clone()) {
            Ok(change) => change,
            Err(e) => {
                debug!(topic, sender, error = %e, "Ignoring message that is not a state change");
                return;
            }
        };
        if !change.settled {
            return;
        }

        self.recorded.fetch_add(1, Ordering::Relaxed);
        info!(
            target: "nimbus::usage",
            kind = %change.kind,
            resource_id = %change.resource_id,
            state = %change.to,
            event = %change.event,
            version = change.version,
            "Usage event"
        );
    }
}
