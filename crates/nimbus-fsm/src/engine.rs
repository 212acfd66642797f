//! Applies events to persisted resources.
//!
//! The engine looks up the edge for the record's current state, persists
//! the move with compare-and-swap and announces it on the bus. A lost race
//! is retried from freshly read state a bounded number of times; an event
//! that is no longer legal after the re-read fails as an illegal transition
//! rather than being applied twice.

use std::sync::Arc;

use nimbus_bus::MessageBus;
use nimbus_core::{Record, ResourceId, ResourceKind, StateChange};
use nimbus_store::VersionedStore;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::machine::StateMachine;

/// Default number of re-read-and-retry rounds after a lost CAS.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 1;

/// Sender name used on the bus.
pub const ENGINE_SENDER: &str = "nimbus-fsm";

/// The state machine engine for one resource kind.
pub struct Engine<K: ResourceKind, S> {
    machine: Arc<StateMachine<K>>,
    store: Arc<S>,
    bus: Arc<MessageBus>,
    max_conflict_retries: u32,
}

impl<K: ResourceKind, S> Clone for Engine<K, S> {
    fn clone(&self) -> Self {
        Self {
            machine: Arc::clone(&self.machine),
            store: Arc::clone(&self.store),
            bus: Arc::clone(&self.bus),
            max_conflict_retries: self.max_conflict_retries,
        }
    }
}

impl<K, S> Engine<K, S>
where
    K: ResourceKind,
    S: VersionedStore<K>,
{
    /// Create an engine with the default retry budget.
    #[must_use]
    pub fn new(machine: Arc<StateMachine<K>>, store: Arc<S>, bus: Arc<MessageBus>) -> Self {
        Self {
            machine,
            store,
            bus,
            max_conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Set how many times a lost CAS is retried against re-read state.
    #[must_use]
    pub const fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// The transition table.
    #[must_use]
    pub fn machine(&self) -> &StateMachine<K> {
        &self.machine
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The bus state changes are published on.
    #[must_use]
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Apply `event` to `record`.
    ///
    /// `mutator` is applied to the payload as part of the same write.
    /// Returns the record as committed.
    ///
    /// # Errors
    ///
    /// - `IllegalTransition` if no edge exists for the event from the
    ///   current state, or its guard refuses
    /// - `ConcurrentModification` if the record changed on every attempt
    /// - `NotFound` if the record disappeared
    /// - `Store` on storage failure
    pub fn transition(
        &self,
        record: &Record<K>,
        event: K::Event,
        mutator: &dyn Fn(&mut K::Payload),
    ) -> Result<Record<K>> {
        let mut current = record.clone();
        let mut attempts = 0;

        loop {
            let to = self.resolve(&current, event)?;
            attempts += 1;

            let written = self.store.swap_if_current(
                current.id,
                current.state,
                current.version,
                to,
                mutator,
            )?;
            if let Some(committed) = written {
                let from = current.state;
                info!(
                    kind = K::NAME,
                    resource_id = %committed.id,
                    %from,
                    %to,
                    %event,
                    version = committed.version,
                    "Resource transitioned"
                );
                self.publish_change(&StateChange::new(from, event, &committed));
                return Ok(committed);
            }

            if attempts > self.max_conflict_retries {
                warn!(
                    kind = K::NAME,
                    resource_id = %current.id,
                    %event,
                    attempts,
                    "Giving up after repeated concurrent modification"
                );
                return Err(EngineError::ConcurrentModification {
                    kind: K::NAME,
                    id: current.id,
                    attempts,
                });
            }

            debug!(
                kind = K::NAME,
                resource_id = %current.id,
                %event,
                "Lost compare-and-swap, re-reading"
            );
            current = self.load(current.id)?;
        }
    }

    /// Read the record by id and apply `event` with no payload changes.
    ///
    /// # Errors
    ///
    /// As [`Engine::transition`], plus `NotFound` if no such record exists.
    pub fn request_transition(&self, id: ResourceId, event: K::Event) -> Result<Record<K>> {
        let record = self.load(id)?;
        self.transition(&record, event, &|_| {})
    }

    /// Whether the record is at a rest point.
    #[must_use]
    pub fn is_settled(record: &Record<K>) -> bool {
        record.is_settled()
    }

    /// Announce a committed change on `{kind}.{id}.stateChanged`.
    ///
    /// The change is already durable, so publish failures are logged rather
    /// than returned.
    pub fn publish_change(&self, change: &StateChange) {
        let topic = nimbus_core::state_changed_topic(&change.kind, change.resource_id);
        let payload = match serde_json::to_value(change) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic, error = %e, "Failed to encode state change");
                return;
            }
        };
        if let Err(e) = self.bus.publish(ENGINE_SENDER, &topic, &payload) {
            warn!(topic, error = %e, "Failed to publish state change");
        }
    }

    fn load(&self, id: ResourceId) -> Result<Record<K>> {
        self.store
            .find_by_id(id)?
            .ok_or(EngineError::NotFound { kind: K::NAME, id })
    }

    fn resolve(&self, record: &Record<K>, event: K::Event) -> Result<K::State> {
        self.machine
            .transition(record.state, event)
            .filter(|edge| edge.permits(record))
            .map(|edge| edge.to)
            .ok_or_else(|| EngineError::IllegalTransition {
                kind: K::NAME,
                id: record.id,
                state: record.state.to_string(),
                event: event.to_string(),
            })
    }
}
