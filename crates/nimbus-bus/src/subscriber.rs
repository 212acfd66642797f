//! Subscriber trait and closure adapter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

/// Receives messages published on a topic or any of its descendants.
///
/// Callbacks run on the publishing thread while the bus gate is held, so
/// they must be fast. Long-running reactions belong on their own worker.
pub trait Subscriber: Send + Sync {
    /// Handle one message.
    fn on_message(&self, sender: &str, topic: &str, payload: &Value);
}

/// Adapts a closure into a [`Subscriber`].
pub struct FnSubscriber<F>(F);

impl<F> FnSubscriber<F>
where
    F: Fn(&str, &str, &Value) + Send + Sync,
{
    /// Wrap a closure.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(&str, &str, &Value) + Send + Sync,
{
    fn on_message(&self, sender: &str, topic: &str, payload: &Value) {
        (self.0)(sender, topic, payload);
    }
}

impl<F> fmt::Debug for FnSubscriber<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSubscriber")
    }
}

/// Handle identifying one subscription, used to unsubscribe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next(counter: &AtomicU64) -> Self {
        Self(counter.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}
