//! Versioned resource storage for nimbus.
//!
//! Every resource is persisted as a [`Record`] carrying its state and a
//! version number. All state changes go through
//! [`VersionedStore::compare_and_swap`], which only writes when both the
//! expected state and the expected version still match. Losing that race
//! is reported as zero rows affected, not as an error.
//!
//! # Backends
//!
//! - [`MemoryStore`]: in-process, for tests and single-node development
//! - [`RocksStore`]: `RocksDB` with the following column families:
//!   - `resources`: primary records, keyed by `kind || 0x00 || id`
//!   - `resources_by_state`: index for listing resources by state
//!   - `meta`: per-kind id counters
//!
//! # Example
//!
//! ```no_run
//! use nimbus_store::{RocksStore, VersionedStore};
//! # fn demo<K: nimbus_core::ResourceKind>(state: K::State) -> nimbus_store::Result<()> {
//! let store = RocksStore::open("/tmp/nimbus-db")?;
//!
//! let record = VersionedStore::<K>::create(&store, state, K::Payload::default())?;
//! let rows = VersionedStore::<K>::compare_and_swap(
//!     &store,
//!     record.id,
//!     state,
//!     record.version,
//!     state,
//!     &|_| {},
//! )?;
//! assert_eq!(rows, 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
mod locks;
pub mod memory;
pub mod rocks;
pub mod schema;

#[cfg(test)]
mod conformance;

pub use error::{Result, StoreError};
pub use locks::DEFAULT_STRIPES;
pub use memory::MemoryStore;
pub use rocks::RocksStore;

use nimbus_core::{Record, ResourceId, ResourceKind};

/// A state change requested by the body of [`VersionedStore::lock_rows`].
pub struct RowUpdate<K: ResourceKind> {
    /// Row to update. Must be one of the locked ids.
    pub id: ResourceId,
    /// State to move to.
    pub new_state: K::State,
    /// Replacement payload.
    pub payload: K::Payload,
}

impl<K: ResourceKind> std::fmt::Debug for RowUpdate<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowUpdate")
            .field("id", &self.id)
            .field("new_state", &self.new_state)
            .finish_non_exhaustive()
    }
}

/// Storage of versioned records for one resource kind.
///
/// Implementations must make `compare_and_swap` atomic per row and must
/// exclude it from rows held by `lock_rows`.
pub trait VersionedStore<K: ResourceKind>: Send + Sync {
    /// Insert a new record at version 1 with a store-allocated id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn create(&self, state: K::State, payload: K::Payload) -> Result<Record<K>>;

    /// Get a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_by_id(&self, id: ResourceId) -> Result<Option<Record<K>>>;

    /// Move a record to `new_state` if it is still at `expected_state` and
    /// `expected_version`.
    ///
    /// On success the mutator is applied to the payload, `updated_at` is set
    /// and the version is incremented by exactly one. Returns the number of
    /// rows affected: 1 on success, 0 if the record is missing or either
    /// expectation no longer holds.
    ///
    /// # Errors
    ///
    /// Returns an error only if the database operation fails.
    fn compare_and_swap(
        &self,
        id: ResourceId,
        expected_state: K::State,
        expected_version: u64,
        new_state: K::State,
        mutator: &dyn Fn(&mut K::Payload),
    ) -> Result<u64> {
        let written =
            self.swap_if_current(id, expected_state, expected_version, new_state, mutator)?;
        Ok(u64::from(written.is_some()))
    }

    /// [`Self::compare_and_swap`], returning the row exactly as written
    /// (`None` where `compare_and_swap` reports zero rows).
    ///
    /// # Errors
    ///
    /// Returns an error only if the database operation fails.
    fn swap_if_current(
        &self,
        id: ResourceId,
        expected_state: K::State,
        expected_version: u64,
        new_state: K::State,
        mutator: &dyn Fn(&mut K::Payload),
    ) -> Result<Option<Record<K>>>;

    /// Apply a mutator to the payload without touching state or version.
    ///
    /// Used for progress heartbeats. Returns false if the record is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn update_payload(&self, id: ResourceId, mutator: &dyn Fn(&mut K::Payload)) -> Result<bool>;

    /// List all records currently in `state`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_by_state(&self, state: K::State) -> Result<Vec<Record<K>>>;

    /// Lock `ids`, read them and run `work` on the records that exist.
    ///
    /// `work` runs inside a [`nimbus_core::unit_of_work::UnitOfWork`], so it
    /// cannot publish on the bus, and it must not call back into the store.
    /// The updates it returns are committed together, each bumping its
    /// row's version. Returns the committed records.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::RowNotLocked` (and commits nothing) if an update
    /// names a row outside `ids`, or an error if the database operation fails.
    fn lock_rows(
        &self,
        ids: &[ResourceId],
        work: &mut dyn FnMut(&[Record<K>]) -> Vec<RowUpdate<K>>,
    ) -> Result<Vec<Record<K>>>;

    /// Delete a record. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete(&self, id: ResourceId) -> Result<bool>;
}

/// Apply a row update to a locked record, bumping its version.
pub(crate) fn apply_update<K: ResourceKind>(record: &mut Record<K>, update: RowUpdate<K>) {
    record.state = update.new_state;
    record.payload = update.payload;
    record.version += 1;
    record.updated_at = chrono::Utc::now();
}
