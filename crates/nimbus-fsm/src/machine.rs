//! Immutable transition tables.
//!
//! A table is built once per resource kind at startup. The builder refuses a
//! second transition for the same `(from, event)` pair, so lookups are
//! deterministic by construction.

use std::collections::{HashMap, HashSet};
use std::fmt;

use nimbus_core::{Record, ResourceKind};

use crate::error::FsmError;

/// Predicate consulted before a transition is allowed.
pub type Guard<K> = Box<dyn Fn(&Record<K>) -> bool + Send + Sync>;

/// One `(from, event) -> to` edge.
pub struct Transition<K: ResourceKind> {
    /// Source state.
    pub from: K::State,
    /// Triggering event.
    pub event: K::Event,
    /// Target state.
    pub to: K::State,
    guard: Option<Guard<K>>,
}

impl<K: ResourceKind> Transition<K> {
    /// Whether the guard (if any) lets `record` take this edge.
    #[must_use]
    pub fn permits(&self, record: &Record<K>) -> bool {
        self.guard.as_ref().map_or(true, |guard| guard(record))
    }

    /// Whether this edge has a guard.
    #[must_use]
    pub const fn is_guarded(&self) -> bool {
        self.guard.is_some()
    }
}

impl<K: ResourceKind> fmt::Debug for Transition<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("event", &self.event)
            .field("to", &self.to)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// The transition table of one resource kind.
pub struct StateMachine<K: ResourceKind> {
    table: HashMap<(K::State, K::Event), Transition<K>>,
}

impl<K: ResourceKind> StateMachine<K> {
    /// Start building a table.
    #[must_use]
    pub fn builder() -> StateMachineBuilder<K> {
        StateMachineBuilder {
            transitions: Vec::new(),
        }
    }

    /// The edge for `(from, event)`, if one is defined.
    #[must_use]
    pub fn transition(&self, from: K::State, event: K::Event) -> Option<&Transition<K>> {
        self.table.get(&(from, event))
    }

    /// Target state for `(from, event)`, ignoring guards.
    #[must_use]
    pub fn next_state(&self, from: K::State, event: K::Event) -> Option<K::State> {
        self.transition(from, event).map(|t| t.to)
    }

    /// Every edge leaving `state`.
    #[must_use]
    pub fn transitions_from(&self, state: K::State) -> Vec<&Transition<K>> {
        self.table.values().filter(|t| t.from == state).collect()
    }

    /// Every event that appears in the table.
    #[must_use]
    pub fn events(&self) -> HashSet<K::Event> {
        self.table.keys().map(|(_, event)| *event).collect()
    }

    /// Every state that appears in the table, as source or target.
    #[must_use]
    pub fn states(&self) -> HashSet<K::State> {
        self.table
            .values()
            .flat_map(|t| [t.from, t.to])
            .collect()
    }

    /// Number of edges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl<K: ResourceKind> fmt::Debug for StateMachine<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("kind", &K::NAME)
            .field("transitions", &self.table.len())
            .finish()
    }
}

/// Collects edges for a [`StateMachine`].
pub struct StateMachineBuilder<K: ResourceKind> {
    transitions: Vec<Transition<K>>,
}

impl<K: ResourceKind> StateMachineBuilder<K> {
    /// Add an unconditional edge.
    #[must_use]
    pub fn transition(mut self, from: K::State, event: K::Event, to: K::State) -> Self {
        self.transitions.push(Transition {
            from,
            event,
            to,
            guard: None,
        });
        self
    }

    /// Add an edge that is only taken when `guard` accepts the record.
    #[must_use]
    pub fn guarded<G>(mut self, from: K::State, event: K::Event, to: K::State, guard: G) -> Self
    where
        G: Fn(&Record<K>) -> bool + Send + Sync + 'static,
    {
        self.transitions.push(Transition {
            from,
            event,
            to,
            guard: Some(Box::new(guard)),
        });
        self
    }

    /// Freeze the table.
    ///
    /// # Errors
    ///
    /// Returns `FsmError::DuplicateTransition` if two edges share a
    /// `(from, event)` pair.
    pub fn build(self) -> Result<StateMachine<K>, FsmError> {
        let mut table = HashMap::with_capacity(self.transitions.len());
        for transition in self.transitions {
            let key = (transition.from, transition.event);
            if table.contains_key(&key) {
                return Err(FsmError::DuplicateTransition {
                    kind: K::NAME,
                    from: transition.from.to_string(),
                    event: transition.event.to_string(),
                });
            }
            table.insert(key, transition);
        }
        Ok(StateMachine { table })
    }
}
