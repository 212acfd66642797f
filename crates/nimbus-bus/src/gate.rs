//! Reentrant gate serializing access to the subscription tree.
//!
//! The gate records which thread owns it. The owner may re-enter freely.
//! Other threads either block until it is free (publish) or leave their
//! write in a queue that the owner replays on release (subscribe,
//! unsubscribe, clear, prune).

use std::collections::VecDeque;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

struct GateState<W> {
    owner: Option<ThreadId>,
    depth: u32,
    queued: VecDeque<W>,
}

pub(crate) struct Gate<W> {
    state: Mutex<GateState<W>>,
    released: Condvar,
}

impl<W> Gate<W> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                owner: None,
                depth: 0,
                queued: VecDeque::new(),
            }),
            released: Condvar::new(),
        }
    }

    /// Enter the gate, waiting for another owner to leave if necessary.
    ///
    /// `replay` is run on release for every write queued while the gate was held.
    pub(crate) fn enter<'a>(&'a self, replay: &'a dyn Fn(W)) -> GateGuard<'a, W> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while state.owner.is_some_and(|owner| owner != me) {
            self.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth += 1;
        GateGuard { gate: self, replay }
    }

    /// Enter the gate if it is free or already ours, handing `write` back
    /// to be applied by the caller. Otherwise queue `write` and return `None`.
    pub(crate) fn enter_or_queue<'a>(
        &'a self,
        write: W,
        replay: &'a dyn Fn(W),
    ) -> Option<(GateGuard<'a, W>, W)> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.owner {
            Some(owner) if owner != me => {
                state.queued.push_back(write);
                None
            }
            _ => {
                state.owner = Some(me);
                state.depth += 1;
                Some((GateGuard { gate: self, replay }, write))
            }
        }
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.state.lock().queued.len()
    }

    fn leave(&self, replay: &dyn Fn(W)) {
        let mut state = self.state.lock();
        state.depth -= 1;
        if state.depth > 0 {
            return;
        }
        // Still the owner here, so nobody can slip in between the replay and the release.
        while let Some(write) = state.queued.pop_front() {
            replay(write);
        }
        state.owner = None;
        drop(state);
        self.released.notify_all();
    }
}

/// Held while a thread owns the gate. Dropping it releases one level.
pub(crate) struct GateGuard<'a, W> {
    gate: &'a Gate<W>,
    replay: &'a dyn Fn(W),
}

impl<W> Drop for GateGuard<'_, W> {
    fn drop(&mut self) {
        self.gate.leave(self.replay);
    }
}
