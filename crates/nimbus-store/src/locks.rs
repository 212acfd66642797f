//! Striped row locks.
//!
//! A fixed number of mutexes shared by all rows. Compare-and-swap holds the
//! stripe of one row; `lock_rows` holds the stripes of every row it touches,
//! acquired in ascending stripe order so two overlapping sets cannot
//! deadlock.

use nimbus_core::ResourceId;
use parking_lot::{Mutex, MutexGuard};

/// Default stripe count.
pub const DEFAULT_STRIPES: usize = 64;

pub(crate) struct RowLocks {
    stripes: Vec<Mutex<()>>,
}

impl RowLocks {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            stripes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe_of(&self, id: ResourceId) -> usize {
        // Stripe count fits in u64 and the remainder fits back in usize.
        #[allow(clippy::cast_possible_truncation)]
        let stripe = (id.get() % self.stripes.len() as u64) as usize;
        stripe
    }

    pub(crate) fn lock(&self, id: ResourceId) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(id)].lock()
    }

    pub(crate) fn lock_many(&self, ids: &[ResourceId]) -> Vec<MutexGuard<'_, ()>> {
        let mut stripes: Vec<usize> = ids.iter().map(|id| self.stripe_of(*id)).collect();
        stripes.sort_unstable();
        stripes.dedup();
        stripes.into_iter().map(|s| self.stripes[s].lock()).collect()
    }
}

impl Default for RowLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
