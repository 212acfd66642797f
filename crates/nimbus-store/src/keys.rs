//! Key encoding utilities for `RocksDB`.
//!
//! Every key starts with the resource kind name and a `0x00` separator so
//! that several kinds can share one column family and still be scanned by
//! prefix. Ids are big-endian so prefix scans come back in id order.

use nimbus_core::ResourceId;

const SEPARATOR: u8 = 0;

/// Encode a kind prefix: `kind || 0x00`.
#[must_use]
pub fn kind_prefix(kind: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(kind.len() + 1);
    key.extend_from_slice(kind.as_bytes());
    key.push(SEPARATOR);
    key
}

/// Encode a resource key: `kind || 0x00 || id`.
#[must_use]
pub fn resource_key(kind: &str, id: ResourceId) -> Vec<u8> {
    let mut key = kind_prefix(kind);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Encode a state index key: `kind || 0x00 || state_tag || id`.
#[must_use]
pub fn state_key(kind: &str, tag: u8, id: ResourceId) -> Vec<u8> {
    let mut key = state_prefix(kind, tag);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Encode a state prefix for scanning all resources of a kind in one state.
#[must_use]
pub fn state_prefix(kind: &str, tag: u8) -> Vec<u8> {
    let mut key = kind_prefix(kind);
    key.push(tag);
    key
}

/// Extract the resource id from the tail of a resource or state key.
///
/// Returns `None` if the key is too short to hold an id.
#[must_use]
pub fn extract_id(key: &[u8]) -> Option<ResourceId> {
    let start = key.len().checked_sub(8)?;
    let bytes: [u8; 8] = key[start..].try_into().ok()?;
    Some(ResourceId::from_be_bytes(bytes))
}

/// Encode the id counter key for a kind.
#[must_use]
pub fn counter_key(kind: &str) -> Vec<u8> {
    kind.as_bytes().to_vec()
}
