//! Tracks whether the current thread is inside a multi-row unit of work.
//!
//! Stores mark the body of a `lock_rows` call with [`UnitOfWork::enter`].
//! The message bus refuses to publish while a unit of work is open, so
//! subscriber callbacks never run while row locks are held.

use std::cell::Cell;

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Guard marking an open unit of work on this thread.
///
/// Units of work nest; the thread leaves the last one when the outermost
/// guard is dropped.
#[derive(Debug)]
pub struct UnitOfWork {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl UnitOfWork {
    /// Open a unit of work on the current thread.
    #[must_use]
    pub fn enter() -> Self {
        DEPTH.with(|depth| depth.set(depth.get().saturating_add(1)));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Whether the current thread has an open unit of work.
#[must_use]
pub fn is_active() -> bool {
    DEPTH.with(|depth| depth.get() > 0)
}
