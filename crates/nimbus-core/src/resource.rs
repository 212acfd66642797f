//! Resource kinds and the versioned record they are persisted as.
//!
//! Every stateful resource type (volume, shared filesystem, template copy)
//! is described by a [`ResourceKind`]: its state enum, its event enum and
//! the resource-specific payload. The store, engine and dispatcher are all
//! generic over the kind, so none of them needs a per-type subclass.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ids::ResourceId;

/// Structured key/value data carried by commands and answers.
///
/// The core treats these as opaque aside from the fields it reads
/// explicitly; payload types pick out what they understand.
pub type AnswerFields = BTreeMap<String, serde_json::Value>;

/// A lifecycle state of some resource kind.
pub trait LifecycleState:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Whether this state represents in-flight work.
    ///
    /// Transitional states must eventually resolve to a stable state.
    fn is_transitional(self) -> bool;

    /// Stable numeric tag used by the store's state index.
    fn tag(self) -> u8;

    /// Whether this state is a rest point.
    fn is_stable(self) -> bool {
        !self.is_transitional()
    }
}

/// A named trigger that moves a resource between states.
pub trait LifecycleEvent:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Resource-specific fields stored alongside state and version.
pub trait ResourcePayload:
    Clone + Default + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Merge the fields of a successful answer (size, checksum, path...).
    fn merge_answer(&mut self, fields: &AnswerFields);

    /// Set or clear the last error message.
    fn record_error(&mut self, error: Option<String>);

    /// Record a progress percentage reported by an in-flight command.
    fn record_progress(&mut self, percent: u8);
}

/// Describes one stateful resource type.
pub trait ResourceKind: Send + Sync + 'static {
    /// Lowercase name, used as the first topic segment and store key prefix.
    const NAME: &'static str;

    /// The state enum.
    type State: LifecycleState;

    /// The event enum.
    type Event: LifecycleEvent;

    /// The resource-specific fields.
    type Payload: ResourcePayload;

    /// Event the recovery sweep raises for a resource stuck in `state`.
    ///
    /// Returning `None` leaves resources in that state alone.
    fn recovery_event(state: Self::State) -> Option<Self::Event> {
        let _ = state;
        None
    }
}

/// The persisted form of a resource.
///
/// The store is the only component that changes `state` and `version`;
/// everybody else works on copies.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Record<K: ResourceKind> {
    /// Stable identity.
    pub id: ResourceId,
    /// Current lifecycle state.
    pub state: K::State,
    /// Incremented by exactly one on every committed state change.
    pub version: u64,
    /// Resource-specific fields.
    pub payload: K::Payload,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl<K: ResourceKind> Record<K> {
    /// Build a fresh record at version 1.
    #[must_use]
    pub fn new(id: ResourceId, state: K::State, payload: K::Payload) -> Self {
        let now = Utc::now();
        Self {
            id,
            state,
            version: 1,
            payload,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the record is at a rest point.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.state.is_stable()
    }

    /// The topic state changes for this record are published on.
    #[must_use]
    pub fn state_changed_topic(&self) -> String {
        state_changed_topic(K::NAME, self.id)
    }
}

impl<K: ResourceKind> Clone for Record<K> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            state: self.state,
            version: self.version,
            payload: self.payload.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl<K: ResourceKind> fmt::Debug for Record<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("kind", &K::NAME)
            .field("id", &self.id)
            .field("state", &self.state)
            .field("version", &self.version)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Build the `{kind}.{id}.stateChanged` topic.
#[must_use]
pub fn state_changed_topic(kind: &str, id: ResourceId) -> String {
    format!("{kind}.{id}.stateChanged")
}

/// Payload published on the bus after every committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Resource kind name.
    pub kind: String,
    /// The resource that moved.
    pub resource_id: ResourceId,
    /// State before the transition.
    pub from: String,
    /// State after the transition.
    pub to: String,
    /// The event that caused it.
    pub event: String,
    /// Version after the transition.
    pub version: u64,
    /// Whether `to` is a stable state.
    pub settled: bool,
}

impl StateChange {
    /// Describe a committed transition of `record` from `from` via `event`.
    #[must_use]
    pub fn new<K: ResourceKind>(from: K::State, event: K::Event, record: &Record<K>) -> Self {
        Self {
            kind: K::NAME.to_string(),
            resource_id: record.id,
            from: from.to_string(),
            to: record.state.to_string(),
            event: event.to_string(),
            version: record.version,
            settled: record.is_settled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    enum LampState {
        Off,
        Warming,
        On,
    }

    impl fmt::Display for LampState {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Debug::fmt(self, f)
        }
    }

    impl LifecycleState for LampState {
        fn is_transitional(self) -> bool {
            matches!(self, Self::Warming)
        }

        fn tag(self) -> u8 {
            self as u8
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    enum LampEvent {
        Switch,
    }

    impl fmt::Display for LampEvent {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Debug::fmt(self, f)
        }
    }

    impl LifecycleEvent for LampEvent {}

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct LampPayload {
        error: Option<String>,
    }

    impl ResourcePayload for LampPayload {
        fn merge_answer(&mut self, _fields: &AnswerFields) {}

        fn record_error(&mut self, error: Option<String>) {
            self.error = error;
        }

        fn record_progress(&mut self, _percent: u8) {}
    }

    struct Lamp;

    impl ResourceKind for Lamp {
        const NAME: &'static str = "lamp";
        type State = LampState;
        type Event = LampEvent;
        type Payload = LampPayload;
    }

    #[test]
    fn new_record_starts_at_version_one() {
        let record = Record::<Lamp>::new(ResourceId::new(3), LampState::Off, LampPayload::default());
        assert_eq!(record.version, 1);
        assert!(record.is_settled());
        assert_eq!(record.state_changed_topic(), "lamp.3.stateChanged");
    }

    #[test]
    fn transitional_record_is_not_settled() {
        let record =
            Record::<Lamp>::new(ResourceId::new(3), LampState::Warming, LampPayload::default());
        assert!(!record.is_settled());
        assert!(Lamp::recovery_event(LampState::Warming).is_none());
    }

    #[test]
    fn state_change_describes_transition() {
        let mut record =
            Record::<Lamp>::new(ResourceId::new(9), LampState::On, LampPayload::default());
        record.version = 2;
        let change = StateChange::new(LampState::Off, LampEvent::Switch, &record);
        assert_eq!(change.kind, "lamp");
        assert_eq!(change.from, "Off");
        assert_eq!(change.to, "On");
        assert_eq!(change.event, "Switch");
        assert_eq!(change.version, 2);
        assert!(change.settled);
    }

    #[test]
    fn record_serde_roundtrip() {
        let record = Record::<Lamp>::new(ResourceId::new(1), LampState::On, LampPayload::default());
        let json = serde_json::to_string(&record).unwrap();
        let parsed: Record<Lamp> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.state, LampState::On);
    }
}
