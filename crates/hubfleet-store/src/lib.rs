//! `RocksDB` cluster registry for hubfleet.
//!
//! This crate provides durable storage for member cluster records using
//! `RocksDB` with column families for efficient ordered listing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `clusters`: Primary cluster records, keyed by cluster name
//! - `clusters_by_create_time`: Index for listing clusters by creation time
//!
//! Names are unique: [`Store::add_cluster`] fails with
//! [`StoreError::AlreadyExists`] when a record is present and
//! [`Store::delete_cluster`] fails with [`StoreError::NotFound`] when it is
//! not. Both are atomic with respect to concurrent callers.
//!
//! # Example
//!
//! ```no_run
//! use hubfleet_store::{ListOptions, RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/hubfleet-db").unwrap();
//!
//! // List clusters, newest first
//! let clusters = store.list_clusters(&ListOptions::default()).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    local_cluster_created_time, Cluster, ClusterFilter, ClusterHealth, ClusterStatus,
    ListOptions, ProviderInfo, SortOrder,
};

use hubfleet_core::ClusterName;

/// The registry trait defining all cluster record operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, fault-injecting wrappers for testing).
pub trait Store: Send + Sync {
    /// Get a cluster by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_cluster(&self, name: &ClusterName) -> Result<Option<Cluster>>;

    /// Insert a new cluster record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if a record with the same name exists.
    fn add_cluster(&self, cluster: &Cluster) -> Result<()>;

    /// Insert or replace a cluster record without a conflict check.
    ///
    /// This also maintains the creation-time index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_cluster(&self, cluster: &Cluster) -> Result<()>;

    /// Delete a cluster record by name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the cluster doesn't exist.
    fn delete_cluster(&self, name: &ClusterName) -> Result<()>;

    /// List clusters matching the filter, sorted and paginated.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_clusters(&self, options: &ListOptions) -> Result<Vec<Cluster>>;

    /// Count clusters matching the filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_clusters(&self, filter: &ClusterFilter) -> Result<u64>;
}
