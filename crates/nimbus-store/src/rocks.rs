//! `RocksDB` storage implementation.
//!
//! One database holds every resource kind. `RocksStore` implements
//! [`VersionedStore<K>`] for all `K`, namespacing keys by `K::NAME`.

use std::path::Path;
use std::sync::Arc;

use nimbus_core::unit_of_work::UnitOfWork;
use nimbus_core::{LifecycleState, Record, ResourceId, ResourceKind};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::keys;
use crate::locks::RowLocks;
use crate::schema::{all_column_families, cf};
use crate::{apply_update, RowUpdate, VersionedStore};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    locks: RowLocks,
    id_alloc: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            locks: RowLocks::default(),
            id_alloc: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn read<K: ResourceKind>(&self, id: ResourceId) -> Result<Option<Record<K>>> {
        let cf = self.cf(cf::RESOURCES)?;
        self.db
            .get_cf(&cf, keys::resource_key(K::NAME, id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Stage a record write, moving its state index entry if the state changed.
    fn stage_write<K: ResourceKind>(
        &self,
        batch: &mut WriteBatch,
        previous: K::State,
        record: &Record<K>,
    ) -> Result<()> {
        let cf_resources = self.cf(cf::RESOURCES)?;
        let cf_by_state = self.cf(cf::RESOURCES_BY_STATE)?;

        batch.put_cf(
            &cf_resources,
            keys::resource_key(K::NAME, record.id),
            Self::serialize(record)?,
        );
        if previous.tag() != record.state.tag() {
            batch.delete_cf(
                &cf_by_state,
                keys::state_key(K::NAME, previous.tag(), record.id),
            );
        }
        batch.put_cf(
            &cf_by_state,
            keys::state_key(K::NAME, record.state.tag(), record.id),
            [],
        );
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Reserve the next id for a kind. Caller holds `id_alloc`.
    fn next_id(&self, kind: &str, batch: &mut WriteBatch) -> Result<ResourceId> {
        let cf_meta = self.cf(cf::META)?;
        let key = keys::counter_key(kind);
        let last = self
            .db
            .get_cf(&cf_meta, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| {
                <[u8; 8]>::try_from(data.as_slice())
                    .map(u64::from_be_bytes)
                    .map_err(|_| StoreError::Serialization(format!("corrupt id counter for {kind}")))
            })
            .transpose()?
            .unwrap_or(0);
        let next = last + 1;
        batch.put_cf(&cf_meta, &key, next.to_be_bytes());
        Ok(ResourceId::new(next))
    }
}

impl<K: ResourceKind> VersionedStore<K> for RocksStore {
    fn create(&self, state: K::State, payload: K::Payload) -> Result<Record<K>> {
        let _alloc = self.id_alloc.lock();
        let mut batch = WriteBatch::default();
        let id = self.next_id(K::NAME, &mut batch)?;
        let record = Record::<K>::new(id, state, payload);
        self.stage_write(&mut batch, state, &record)?;
        self.write(batch)?;
        Ok(record)
    }

    fn find_by_id(&self, id: ResourceId) -> Result<Option<Record<K>>> {
        self.read(id)
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
        let Some(mut record) = self.read::<K>(id)? else {
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

        let previous = record.state;
        mutator(&mut record.payload);
        record.state = new_state;
        record.version += 1;
        record.updated_at = chrono::Utc::now();

        let mut batch = WriteBatch::default();
        self.stage_write(&mut batch, previous, &record)?;
        self.write(batch)?;
        Ok(Some(record))
    }

    fn update_payload(&self, id: ResourceId, mutator: &dyn Fn(&mut K::Payload)) -> Result<bool> {
        let _row = self.locks.lock(id);
        let Some(mut record) = self.read::<K>(id)? else {
            return Ok(false);
        };
        mutator(&mut record.payload);
        record.updated_at = chrono::Utc::now();

        let mut batch = WriteBatch::default();
        self.stage_write(&mut batch, record.state, &record)?;
        self.write(batch)?;
        Ok(true)
    }

    fn list_by_state(&self, state: K::State) -> Result<Vec<Record<K>>> {
        let cf_by_state = self.cf(cf::RESOURCES_BY_STATE)?;
        let prefix = keys::state_prefix(K::NAME, state.tag());

        let mut records = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_by_state,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            let Some(id) = keys::extract_id(&key) else {
                continue;
            };
            if let Some(record) = self.read::<K>(id)? {
                records.push(record);
            }
        }

        Ok(records)
    }

    fn lock_rows(
        &self,
        ids: &[ResourceId],
        work: &mut dyn FnMut(&[Record<K>]) -> Vec<RowUpdate<K>>,
    ) -> Result<Vec<Record<K>>> {
        let _rows = self.locks.lock_many(ids);

        let mut locked = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.read::<K>(*id)? {
                locked.push(record);
            }
        }

        let updates = {
            let _uow = UnitOfWork::enter();
            work(&locked)
        };

        let mut batch = WriteBatch::default();
        let mut committed = Vec::with_capacity(updates.len());
        for update in updates {
            let Some(current) = locked.iter_mut().find(|r| r.id == update.id) else {
                return Err(StoreError::RowNotLocked(update.id));
            };
            let previous = current.state;
            apply_update(current, update);
            self.stage_write(&mut batch, previous, current)?;
            committed.push(current.clone());
        }

        self.write(batch)?;
        Ok(committed)
    }

    fn delete(&self, id: ResourceId) -> Result<bool> {
        let _row = self.locks.lock(id);
        let Some(record) = self.read::<K>(id)? else {
            return Ok(false);
        };

        let cf_resources = self.cf(cf::RESOURCES)?;
        let cf_by_state = self.cf(cf::RESOURCES_BY_STATE)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_resources, keys::resource_key(K::NAME, id));
        batch.delete_cf(
            &cf_by_state,
            keys::state_key(K::NAME, record.state.tag(), id),
        );
        self.write(batch)?;
        Ok(true)
    }
}
