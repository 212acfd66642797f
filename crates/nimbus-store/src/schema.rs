//! Database schema definitions and column families.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary resource records, keyed by `kind || 0x00 || id`.
    pub const RESOURCES: &str = "resources";

    /// Index: resources by state, keyed by `kind || 0x00 || state_tag || id`.
    pub const RESOURCES_BY_STATE: &str = "resources_by_state";

    /// Per-kind id counters, keyed by `kind`.
    pub const META: &str = "meta";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::RESOURCES, cf::RESOURCES_BY_STATE, cf::META]
}
