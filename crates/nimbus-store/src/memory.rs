//! In-memory storage implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use nimbus_core::unit_of_work::UnitOfWork;
use nimbus_core::{Record, ResourceId, ResourceKind};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::locks::RowLocks;
use crate::{apply_update, RowUpdate, VersionedStore};

/// Map-backed storage for a single resource kind.
pub struct MemoryStore<K: ResourceKind> {
    rows: RwLock<HashMap<ResourceId, Record<K>>>,
    next_id: AtomicU64,
    locks: RowLocks,
}

impl<K: ResourceKind> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ResourceKind> MemoryStore<K> {
    /// Create an empty store. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            locks: RowLocks::default(),
        }
    }

    /// Insert a record as-is, keeping its id, state and version.
    ///
    /// For seeding fixtures; later `create` calls allocate ids above it.
    pub fn insert(&self, record: Record<K>) {
        self.next_id
            .fetch_max(record.id.get() + 1, Ordering::Relaxed);
        self.rows.write().insert(record.id, record);
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl<K: ResourceKind> VersionedStore<K> for MemoryStore<K> {
    fn create(&self, state: K::State, payload: K::Payload) -> Result<Record<K>> {
        let id = ResourceId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = Record::new(id, state, payload);
        self.rows.write().insert(id, record.clone());
        Ok(record)
    }

    fn find_by_id(&self, id: ResourceId) -> Result<Option<Record<K>>> {
        Ok(self.rows.read().get(&id).cloned())
    }

    fn swap_if_current(
        &self,
        id: ResourceId,
        expected_state: K::State,
        expected_version: u64,
        new_state: K::State,
        mutator: &dyn Fn(&mut K::Payload),
    ) -> Result<Option<Record<K>>> {
        let _row = self.locks.lock(id);
        let mut rows = self.rows.write();
        let Some(record) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if record.state != expected_state || record.version != expected_version {
            debug!(
                kind = K::NAME,
                resource_id = %id,
                expected_version,
                actual_version = record.version,
                "Compare-and-swap rejected"
            );
            return Ok(None);
        }

        mutator(&mut record.payload);
        record.state = new_state;
        record.version += 1;
        record.updated_at = chrono::Utc::now();
        Ok(Some(record.clone()))
    }

    fn update_payload(&self, id: ResourceId, mutator: &dyn Fn(&mut K::Payload)) -> Result<bool> {
        let _row = self.locks.lock(id);
        let mut rows = self.rows.write();
        let Some(record) = rows.get_mut(&id) else {
            return Ok(false);
        };
        mutator(&mut record.payload);
        record.updated_at = chrono::Utc::now();
        Ok(true)
    }

    fn list_by_state(&self, state: K::State) -> Result<Vec<Record<K>>> {
        let mut records: Vec<Record<K>> = self
            .rows
            .read()
            .values()
            .filter(|r| r.state == state)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    fn lock_rows(
        &self,
        ids: &[ResourceId],
        work: &mut dyn FnMut(&[Record<K>]) -> Vec<RowUpdate<K>>,
    ) -> Result<Vec<Record<K>>> {
        let _rows = self.locks.lock_many(ids);

        let locked: Vec<Record<K>> = {
            let rows = self.rows.read();
            ids.iter().filter_map(|id| rows.get(id).cloned()).collect()
        };

        let updates = {
            let _uow = UnitOfWork::enter();
            work(&locked)
        };

        if let Some(stray) = updates.iter().find(|u| !locked.iter().any(|r| r.id == u.id)) {
            return Err(StoreError::RowNotLocked(stray.id));
        }

        let mut rows = self.rows.write();
        let mut committed = Vec::with_capacity(updates.len());
        for update in updates {
            if let Some(record) = rows.get_mut(&update.id) {
                apply_update(record, update);
                committed.push(record.clone());
            }
        }
        Ok(committed)
    }

    fn delete(&self, id: ResourceId) -> Result<bool> {
        let _row = self.locks.lock(id);
        Ok(self.rows.write().remove(&id).is_some())
    }
}
