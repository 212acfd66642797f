//! The message bus.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use nimbus_core::unit_of_work;

use crate::error::{BusError, Result};
use crate::gate::Gate;
use crate::node::{segments, SubscriptionNode};
use crate::subscriber::{Subscriber, SubscriptionId};

/// A tree mutation, applied directly or replayed when the gate is released.
enum Write {
    Subscribe {
        path: Vec<String>,
        id: SubscriptionId,
        subscriber: Arc<dyn Subscriber>,
    },
    Unsubscribe {
        path: Vec<String>,
        id: SubscriptionId,
    },
    ClearAll,
    Prune,
}

/// Topic-based publish/subscribe with bubble-up delivery.
///
/// Publishing on `a.b.c` notifies subscribers of `a.b.c`, then `a.b`, then
/// `a`, then the root (empty topic).
pub struct MessageBus {
    tree: Mutex<SubscriptionNode>,
    gate: Gate<Write>,
    next_id: AtomicU64,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(SubscriptionNode::default()),
            gate: Gate::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to `topic` and all of its descendants.
    ///
    /// If another thread is currently publishing, the subscription is queued
    /// and takes effect when that publish completes.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidTopic` if the topic has an empty segment.
    pub fn subscribe(&self, topic: &str, subscriber: Arc<dyn Subscriber>) -> Result<SubscriptionId> {
        let path = owned_segments(topic)?;
        let id = SubscriptionId::next(&self.next_id);
        self.write(Write::Subscribe {
            path,
            id,
            subscriber,
        });
        Ok(id)
    }

    /// Remove one subscription from `topic`. Siblings are unaffected.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidTopic` if the topic has an empty segment.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> Result<()> {
        let path = owned_segments(topic)?;
        self.write(Write::Unsubscribe { path, id });
        Ok(())
    }

    /// Remove every subscriber and prune the tree down to the root.
    pub fn clear_all(&self) {
        self.write(Write::ClearAll);
    }

    /// Remove nodes with no subscribers and no children, bottom-up.
    pub fn prune(&self) {
        self.write(Write::Prune);
    }

    /// Deliver `payload` to the subscribers of `topic` and its ancestors.
    ///
    /// Blocks while another thread holds the gate. Returns the number of
    /// subscribers notified.
    ///
    /// # Errors
    ///
    /// Returns `BusError::PublishInUnitOfWork` if the calling thread holds an
    /// open unit of work, and `BusError::InvalidTopic` for malformed topics.
    pub fn publish(&self, sender: &str, topic: &str, payload: &Value) -> Result<usize> {
        if unit_of_work::is_active() {
            return Err(BusError::PublishInUnitOfWork {
                topic: topic.to_string(),
            });
        }
        let path = segments(topic)?;

        let replay = |write: Write| self.apply(write);
        let _guard = self.gate.enter(&replay);

        // Snapshot so callbacks can subscribe or unsubscribe without deadlocking on the tree.
        let chain = self.tree.lock().delivery_chain(&path);
        for subscriber in &chain {
            subscriber.on_message(sender, topic, payload);
        }

        trace!(sender, topic, delivered = chain.len(), "Published message");
        Ok(chain.len())
    }

    /// Number of subscribers attached exactly at `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        segments(topic).map_or(0, |path| self.tree.lock().subscriber_count(&path))
    }

    /// Number of nodes in the subscription tree, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.tree.lock().node_count()
    }

    /// Number of writes waiting for the gate to be released.
    #[must_use]
    pub fn queued_writes(&self) -> usize {
        self.gate.queued_len()
    }

    fn write(&self, write: Write) {
        let replay = |write: Write| self.apply(write);
        if let Some((_guard, write)) = self.gate.enter_or_queue(write, &replay) {
            self.apply(write);
        } else {
            debug!("Bus gate busy, queued subscription change");
        };
    }

    fn apply(&self, write: Write) {
        let mut tree = self.tree.lock();
        match write {
            Write::Subscribe {
                path,
                id,
                subscriber,
            } => {
                let path: Vec<&str> = path.iter().map(String::as_str).collect();
                tree.subscribe(&path, id, subscriber);
            }
            Write::Unsubscribe { path, id } => {
                let path: Vec<&str> = path.iter().map(String::as_str).collect();
                if !tree.unsubscribe(&path, id) {
                    debug!(subscription = %id, "Unsubscribe for unknown subscription");
                }
            }
            Write::ClearAll => {
                tree.clear_subscribers();
                tree.prune();
            }
            Write::Prune => tree.prune(),
        }
    }
}

fn owned_segments(topic: &str) -> Result<Vec<String>> {
    Ok(segments(topic)?.into_iter().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::FnSubscriber;
    use nimbus_core::unit_of_work::UnitOfWork;
    use serde_json::json;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, label: &str) -> Arc<dyn Subscriber> {
        let log = Arc::clone(log);
        let label = label.to_string();
        Arc::new(FnSubscriber::new(move |_: &str, _: &str, _: &Value| {
            log.lock().push(label.clone());
        }))
    }

    #[test]
    fn bubble_up_order() {
        let bus = MessageBus::new();
        let log: Log = Arc::default();
        bus.subscribe("a", recorder(&log, "a")).unwrap();
        bus.subscribe("", recorder(&log, "root")).unwrap();
        bus.subscribe("a.b.c", recorder(&log, "a.b.c")).unwrap();
        bus.subscribe("a.b", recorder(&log, "a.b")).unwrap();

        let delivered = bus.publish("test", "a.b.c", &json!({})).unwrap();

        assert_eq!(delivered, 4);
        assert_eq!(*log.lock(), vec!["a.b.c", "a.b", "a", "root"]);
    }

    #[test]
    fn descendant_topic_reaches_prefix_but_not_sibling() {
        let bus = MessageBus::new();
        let log: Log = Arc::default();
        bus.subscribe("volume", recorder(&log, "volume")).unwrap();
        bus.subscribe("snapshot.stateChanged", recorder(&log, "snapshot"))
            .unwrap();

        bus.publish("test", "volume.77.stateChanged", &json!({"to": "Ready"}))
            .unwrap();

        assert_eq!(*log.lock(), vec!["volume"]);
    }

    #[test]
    fn unsubscribe_removes_only_target() {
        let bus = MessageBus::new();
        let log: Log = Arc::default();
        let first = bus.subscribe("x.y", recorder(&log, "first")).unwrap();
        bus.subscribe("x.y", recorder(&log, "second")).unwrap();

        bus.unsubscribe("x.y", first).unwrap();
        bus.publish("test", "x.y", &Value::Null).unwrap();

        assert_eq!(*log.lock(), vec!["second"]);
        assert_eq!(bus.subscriber_count("x.y"), 1);
    }

    #[test]
    fn payload_and_sender_are_delivered() {
        let bus = MessageBus::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            "volume",
            Arc::new(FnSubscriber::new(move |sender: &str, topic: &str, payload: &Value| {
                *sink.lock() = Some((sender.to_string(), topic.to_string(), payload.clone()));
            })),
        )
        .unwrap();

        bus.publish("engine", "volume.1.stateChanged", &json!({"version": 2}))
            .unwrap();

        let (sender, topic, payload) = seen.lock().clone().unwrap();
        assert_eq!(sender, "engine");
        assert_eq!(topic, "volume.1.stateChanged");
        assert_eq!(payload["version"], 2);
    }

    #[test]
    fn publish_refused_inside_unit_of_work() {
        let bus = MessageBus::new();
        let _uow = UnitOfWork::enter();
        let result = bus.publish("test", "a", &Value::Null);
        assert!(matches!(result, Err(BusError::PublishInUnitOfWork { .. })));
    }

    #[test]
    fn invalid_topic_rejected() {
        let bus = MessageBus::new();
        let log: Log = Arc::default();
        assert!(bus.subscribe("a..b", recorder(&log, "x")).is_err());
        assert!(bus.publish("test", "a.", &Value::Null).is_err());
    }

    #[test]
    fn clear_all_prunes_to_root() {
        let bus = MessageBus::new();
        let log: Log = Arc::default();
        bus.subscribe("a.b.c", recorder(&log, "1")).unwrap();
        bus.subscribe("d", recorder(&log, "2")).unwrap();
        assert_eq!(bus.node_count(), 5);

        bus.clear_all();

        assert_eq!(bus.node_count(), 1);
        assert_eq!(bus.publish("test", "a.b.c", &Value::Null).unwrap(), 0);
    }

    #[test]
    fn prune_after_unsubscribe() {
        let bus = MessageBus::new();
        let log: Log = Arc::default();
        let id = bus.subscribe("a.b", recorder(&log, "1")).unwrap();
        bus.unsubscribe("a.b", id).unwrap();
        assert_eq!(bus.node_count(), 3);

        bus.prune();

        assert_eq!(bus.node_count(), 1);
    }

    #[test]
    fn reentrant_subscribe_from_callback_applies_immediately() {
        let bus = Arc::new(MessageBus::new());
        let log: Log = Arc::default();
        let inner_bus = Arc::clone(&bus);
        let inner_log = Arc::clone(&log);
        bus.subscribe(
            "a",
            Arc::new(FnSubscriber::new(move |_: &str, _: &str, _: &Value| {
                inner_bus
                    .subscribe("a.late", recorder(&inner_log, "late"))
                    .unwrap();
                assert_eq!(inner_bus.queued_writes(), 0);
            })),
        )
        .unwrap();

        bus.publish("test", "a", &Value::Null).unwrap();

        assert_eq!(bus.subscriber_count("a.late"), 1);
    }

    #[test]
    fn reentrant_publish_from_callback_does_not_block() {
        let bus = Arc::new(MessageBus::new());
        let log: Log = Arc::default();
        bus.subscribe("inner", recorder(&log, "inner")).unwrap();
        let inner_bus = Arc::clone(&bus);
        bus.subscribe(
            "outer",
            Arc::new(FnSubscriber::new(move |_: &str, _: &str, _: &Value| {
                inner_bus.publish("test", "inner", &Value::Null).unwrap();
            })),
        )
        .unwrap();

        bus.publish("test", "outer", &Value::Null).unwrap();

        assert_eq!(*log.lock(), vec!["inner"]);
    }

    #[test]
    fn writes_from_other_threads_are_queued_until_release() {
        let bus = Arc::new(MessageBus::new());
        let log: Log = Arc::default();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let resume_rx = Mutex::new(resume_rx);
        bus.subscribe(
            "slow",
            Arc::new(FnSubscriber::new(move |_: &str, _: &str, _: &Value| {
                entered_tx.send(()).unwrap();
                resume_rx.lock().recv().unwrap();
            })),
        )
        .unwrap();

        let publisher = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.publish("test", "slow", &Value::Null).unwrap())
        };
        entered_rx.recv().unwrap();

        // The gate is held by the publisher thread: this write must be deferred.
        bus.subscribe("fresh", recorder(&log, "fresh")).unwrap();
        assert_eq!(bus.queued_writes(), 1);
        assert_eq!(bus.subscriber_count("fresh"), 0);

        resume_tx.send(()).unwrap();
        publisher.join().unwrap();

        assert_eq!(bus.queued_writes(), 0);
        assert_eq!(bus.subscriber_count("fresh"), 1);
    }

    #[test]
    fn publish_from_other_thread_waits_for_gate() {
        let bus = Arc::new(MessageBus::new());
        let log: Log = Arc::default();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let resume_rx = Mutex::new(resume_rx);
        let slow_log = Arc::clone(&log);
        bus.subscribe(
            "slow",
            Arc::new(FnSubscriber::new(move |_: &str, _: &str, _: &Value| {
                entered_tx.send(()).unwrap();
                resume_rx.lock().recv().unwrap();
                slow_log.lock().push("slow".to_string());
            })),
        )
        .unwrap();
        bus.subscribe("fast", recorder(&log, "fast")).unwrap();

        let first = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.publish("test", "slow", &Value::Null).unwrap())
        };
        entered_rx.recv().unwrap();

        let second = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.publish("test", "fast", &Value::Null).unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(log.lock().is_empty());

        resume_tx.send(()).unwrap();
        first.join().unwrap();
        second.join().unwrap();

        assert_eq!(*log.lock(), vec!["slow", "fast"]);
    }
}
