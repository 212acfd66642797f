//! Behaviour every `VersionedStore` backend must share.

use std::sync::Barrier;
use std::thread;

use nimbus_core::testing::{Disk, DiskPayload, DiskState};
use nimbus_core::unit_of_work;
use nimbus_core::ResourceId;

use crate::{RowUpdate, StoreError, VersionedStore};

fn allocated<S: VersionedStore<Disk>>(store: &S) -> nimbus_core::Record<Disk> {
    store
        .create(DiskState::Allocated, DiskPayload::default())
        .unwrap()
}

pub(crate) fn create_and_find<S: VersionedStore<Disk>>(store: &S) {
    let first = allocated(store);
    let second = allocated(store);

    assert_eq!(first.version, 1);
    assert_ne!(first.id, second.id);

    let found = store.find_by_id(first.id).unwrap().unwrap();
    assert_eq!(found.state, DiskState::Allocated);
    assert_eq!(found.version, 1);
    assert!(store.find_by_id(ResourceId::new(9999)).unwrap().is_none());
}

pub(crate) fn cas_success_bumps_version<S: VersionedStore<Disk>>(store: &S) {
    let record = allocated(store);

    let rows = store
        .compare_and_swap(record.id, DiskState::Allocated, 1, DiskState::Creating, &|p| {
            p.size_gb = Some(20);
        })
        .unwrap();

    assert_eq!(rows, 1);
    let updated = store.find_by_id(record.id).unwrap().unwrap();
    assert_eq!(updated.state, DiskState::Creating);
    assert_eq!(updated.version, 2);
    assert_eq!(updated.payload.size_gb, Some(20));
    assert!(updated.updated_at >= record.updated_at);
}

pub(crate) fn swap_returns_row_as_written<S: VersionedStore<Disk>>(store: &S) {
    let record = allocated(store);
    // A heartbeat lands after the caller's read; the version does not move.
    store
        .update_payload(record.id, &|p| p.progress = Some(40))
        .unwrap();

    let written = store
        .swap_if_current(record.id, DiskState::Allocated, 1, DiskState::Creating, &|p| {
            p.size_gb = Some(20);
        })
        .unwrap()
        .unwrap();

    let stored = store.find_by_id(record.id).unwrap().unwrap();
    assert_eq!(written.version, 2);
    assert_eq!(written.state, DiskState::Creating);
    assert_eq!(written.payload.progress, Some(40));
    assert_eq!(written.payload.size_gb, Some(20));
    assert_eq!(written.updated_at, stored.updated_at);
    assert_eq!(written.payload.progress, stored.payload.progress);

    let stale = store
        .swap_if_current(record.id, DiskState::Allocated, 1, DiskState::Creating, &|_| {})
        .unwrap();
    assert!(stale.is_none());
}

pub(crate) fn cas_rejects_stale_expectations<S: VersionedStore<Disk>>(store: &S) {
    let record = allocated(store);

    let stale_version = store
        .compare_and_swap(record.id, DiskState::Allocated, 5, DiskState::Creating, &|_| {})
        .unwrap();
    let wrong_state = store
        .compare_and_swap(record.id, DiskState::Ready, 1, DiskState::Creating, &|_| {})
        .unwrap();
    let missing = store
        .compare_and_swap(ResourceId::new(9999), DiskState::Allocated, 1, DiskState::Creating, &|_| {})
        .unwrap();

    assert_eq!((stale_version, wrong_state, missing), (0, 0, 0));
    let unchanged = store.find_by_id(record.id).unwrap().unwrap();
    assert_eq!(unchanged.state, DiskState::Allocated);
    assert_eq!(unchanged.version, 1);
}

pub(crate) fn concurrent_cas_has_one_winner<S: VersionedStore<Disk>>(store: &S) {
    const CONTENDERS: usize = 8;
    let record = allocated(store);
    let barrier = Barrier::new(CONTENDERS);

    let wins: u64 = thread::scope(|scope| {
        let handles: Vec<_> = (0..CONTENDERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    store
                        .compare_and_swap(
                            record.id,
                            DiskState::Allocated,
                            record.version,
                            DiskState::Creating,
                            &|_| {},
                        )
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(wins, 1);
    assert_eq!(store.find_by_id(record.id).unwrap().unwrap().version, 2);
}

pub(crate) fn update_payload_keeps_version<S: VersionedStore<Disk>>(store: &S) {
    let record = allocated(store);

    assert!(store.update_payload(record.id, &|p| p.progress = Some(40)).unwrap());
    assert!(!store.update_payload(ResourceId::new(9999), &|_| {}).unwrap());

    let updated = store.find_by_id(record.id).unwrap().unwrap();
    assert_eq!(updated.payload.progress, Some(40));
    assert_eq!(updated.version, 1);
    assert_eq!(updated.state, DiskState::Allocated);
}

pub(crate) fn list_by_state_follows_transitions<S: VersionedStore<Disk>>(store: &S) {
    let a = allocated(store);
    let b = allocated(store);
    store
        .compare_and_swap(b.id, DiskState::Allocated, 1, DiskState::Creating, &|_| {})
        .unwrap();

    let allocated_ids: Vec<_> = store
        .list_by_state(DiskState::Allocated)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    let creating_ids: Vec<_> = store
        .list_by_state(DiskState::Creating)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();

    assert_eq!(allocated_ids, vec![a.id]);
    assert_eq!(creating_ids, vec![b.id]);
    assert!(store.list_by_state(DiskState::Ready).unwrap().is_empty());
}

pub(crate) fn lock_rows_commits_updates<S: VersionedStore<Disk>>(store: &S) {
    let a = allocated(store);
    let b = allocated(store);
    let missing = ResourceId::new(9999);

    let committed = store
        .lock_rows(&[a.id, b.id, missing], &mut |rows| {
            assert!(unit_of_work::is_active());
            assert_eq!(rows.len(), 2);
            rows.iter()
                .map(|r| {
                    let mut payload = r.payload.clone();
                    payload.error = Some("recovered".to_string());
                    RowUpdate {
                        id: r.id,
                        new_state: DiskState::Error,
                        payload,
                    }
                })
                .collect()
        })
        .unwrap();

    assert!(!unit_of_work::is_active());
    assert_eq!(committed.len(), 2);
    for id in [a.id, b.id] {
        let record = store.find_by_id(id).unwrap().unwrap();
        assert_eq!(record.state, DiskState::Error);
        assert_eq!(record.version, 2);
        assert_eq!(record.payload.error.as_deref(), Some("recovered"));
    }
}

pub(crate) fn lock_rows_rejects_stray_update<S: VersionedStore<Disk>>(store: &S) {
    let a = allocated(store);
    let b = allocated(store);

    let result = store.lock_rows(&[a.id], &mut |_| {
        vec![
            RowUpdate {
                id: a.id,
                new_state: DiskState::Error,
                payload: DiskPayload::default(),
            },
            RowUpdate {
                id: b.id,
                new_state: DiskState::Error,
                payload: DiskPayload::default(),
            },
        ]
    });

    assert!(matches!(result, Err(StoreError::RowNotLocked(id)) if id == b.id));
    assert_eq!(store.find_by_id(a.id).unwrap().unwrap().version, 1);
    assert_eq!(store.find_by_id(b.id).unwrap().unwrap().version, 1);
}

pub(crate) fn delete_removes_record<S: VersionedStore<Disk>>(store: &S) {
    let record = allocated(store);

    assert!(store.delete(record.id).unwrap());
    assert!(!store.delete(record.id).unwrap());
    assert!(store.find_by_id(record.id).unwrap().is_none());
    assert!(store.list_by_state(DiskState::Allocated).unwrap().is_empty());
}
