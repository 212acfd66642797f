//! Core identifier types for nimbus.
//!
//! Resources are addressed by a plain integer id allocated by the store.
//! Commands sent to agents carry a random correlation id that links them to
//! their eventual answer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A stable resource identifier.
///
/// Ids are allocated by the versioned store and never reused within a kind.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Create a `ResourceId` from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Return the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Big-endian bytes, so that encoded keys sort in id order.
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode from big-endian bytes.
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| IdError::InvalidInteger(s.to_string()))
    }
}

impl From<u64> for ResourceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A 16-byte correlation identifier based on UUID v4.
///
/// Embedded in every command shipped to an agent and echoed back in the
/// answer. The dispatcher keys its pending table on it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    /// Create a new `CorrelationId` from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a new random `CorrelationId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for CorrelationId {
    type Err = IdError;

    /// Parse a `CorrelationId` from a UUID string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({})", self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.0.to_string()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid unsigned integer.
    #[error("invalid resource id: {0}")]
    InvalidInteger(String),

    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_parse() {
        let id: ResourceId = "42".parse().unwrap();
        assert_eq!(id, ResourceId::new(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn resource_id_invalid() {
        let result = ResourceId::from_str("vol-1");
        assert!(matches!(result, Err(IdError::InvalidInteger(_))));
    }

    #[test]
    fn resource_id_bytes_sort_in_id_order() {
        let low = ResourceId::new(2).to_be_bytes();
        let high = ResourceId::new(256).to_be_bytes();
        assert!(low < high);
        assert_eq!(ResourceId::from_be_bytes(high), ResourceId::new(256));
    }

    #[test]
    fn resource_id_serializes_as_number() {
        let json = serde_json::to_string(&ResourceId::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn correlation_id_unique() {
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }

    #[test]
    fn correlation_id_serde_json() {
        let id = CorrelationId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: CorrelationId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn correlation_id_invalid_uuid() {
        let result = CorrelationId::from_str("not-a-uuid");
        assert!(matches!(result, Err(IdError::InvalidUuid)));
    }
}
