//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary cluster records, keyed by cluster name.
    pub const CLUSTERS: &str = "clusters";

    /// Index: clusters by creation time, keyed by `create_time || name`.
    pub const CLUSTERS_BY_CREATE_TIME: &str = "clusters_by_create_time";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::CLUSTERS, cf::CLUSTERS_BY_CREATE_TIME]
}
