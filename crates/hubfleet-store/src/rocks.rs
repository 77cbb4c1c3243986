//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use hubfleet_core::ClusterName;
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{Cluster, ClusterFilter, ListOptions, SortOrder};
use crate::Store;

/// RocksDB-backed registry implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    /// Serializes read-modify-write sequences so add/put/delete are atomic per name.
    write_lock: Mutex<()>,
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
            write_lock: Mutex::new(()),
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

    /// Write the record and its index entry, replacing a stale index entry if
    /// the creation time changed. Callers must hold `write_lock`.
    fn write_cluster(&self, cluster: &Cluster, previous: Option<&Cluster>) -> Result<()> {
        let cf_clusters = self.cf(cf::CLUSTERS)?;
        let cf_by_time = self.cf(cf::CLUSTERS_BY_CREATE_TIME)?;

        let cluster_key = keys::cluster_key(&cluster.name);
        let time_key = keys::create_time_key(cluster.create_time, &cluster.name);
        let value = Self::serialize(cluster)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_clusters, &cluster_key, &value);

        if let Some(old) = previous {
            if old.create_time != cluster.create_time {
                let old_time_key = keys::create_time_key(old.create_time, &old.name);
                batch.delete_cf(&cf_by_time, &old_time_key);
            }
        }
        batch.put_cf(&cf_by_time, &time_key, []);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Walk the creation-time index in the requested order, yielding the
    /// names that pass the filter.
    fn scan_names(&self, filter: &ClusterFilter, sort: SortOrder) -> Result<Vec<ClusterName>> {
        let cf_by_time = self.cf(cf::CLUSTERS_BY_CREATE_TIME)?;
        let mode = match sort {
            SortOrder::CreateTimeAscending => IteratorMode::Start,
            SortOrder::CreateTimeDescending => IteratorMode::End,
        };

        let mut names = Vec::new();
        for item in self.db.iterator_cf(&cf_by_time, mode) {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            let Some(name) = keys::extract_name_from_create_time_key(&key) else {
                tracing::warn!(key_len = key.len(), "Skipping malformed create-time index key");
                continue;
            };

            if filter.matches(&name) {
                names.push(name);
            }
        }

        Ok(names)
    }
}

impl Store for RocksStore {
    fn get_cluster(&self, name: &ClusterName) -> Result<Option<Cluster>> {
        let cf = self.cf(cf::CLUSTERS)?;
        let key = keys::cluster_key(name);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn add_cluster(&self, cluster: &Cluster) -> Result<()> {
        let _guard = self.write_lock.lock();

        if self.get_cluster(&cluster.name)?.is_some() {
            return Err(StoreError::AlreadyExists);
        }

        self.write_cluster(cluster, None)
    }

    fn put_cluster(&self, cluster: &Cluster) -> Result<()> {
        let _guard = self.write_lock.lock();

        let previous = self.get_cluster(&cluster.name)?;
        self.write_cluster(cluster, previous.as_ref())
    }

    fn delete_cluster(&self, name: &ClusterName) -> Result<()> {
        let _guard = self.write_lock.lock();

        let cf_clusters = self.cf(cf::CLUSTERS)?;
        let cf_by_time = self.cf(cf::CLUSTERS_BY_CREATE_TIME)?;

        let cluster = self.get_cluster(name)?.ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_clusters, keys::cluster_key(name));
        batch.delete_cf(
            &cf_by_time,
            keys::create_time_key(cluster.create_time, name),
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn list_clusters(&self, options: &ListOptions) -> Result<Vec<Cluster>> {
        let (skip, take) = options.window();
        let names = self.scan_names(&options.filter, options.sort)?;

        let mut clusters = Vec::new();
        for name in names
            .iter()
            .skip(skip)
            .take(take.unwrap_or(usize::MAX))
        {
            if let Some(cluster) = self.get_cluster(name)? {
                clusters.push(cluster);
            }
        }

        Ok(clusters)
    }

    fn count_clusters(&self, filter: &ClusterFilter) -> Result<u64> {
        let names = self.scan_names(filter, SortOrder::CreateTimeAscending)?;
        Ok(names.len() as u64)
    }
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{local_cluster_created_time, ClusterHealth};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn create_test_cluster(name: &str, age_minutes: i64) -> Cluster {
        let mut cluster = Cluster::new(ClusterName::new(name).unwrap());
        cluster.create_time = Utc::now() - Duration::minutes(age_minutes);
        cluster.update_time = cluster.create_time;
        cluster.kube_config = Some(format!("kubeconfig-for-{name}"));
        cluster
    }

    #[test]
    fn cluster_crud() {
        let (store, _dir) = create_test_store();
        let mut cluster = create_test_cluster("east-1", 0);

        // Create
        store.add_cluster(&cluster).unwrap();

        // Read
        let retrieved = store.get_cluster(&cluster.name).unwrap().unwrap();
        assert_eq!(retrieved, cluster);

        // Update
        cluster.health = ClusterHealth::unhealthy("probe failed");
        store.put_cluster(&cluster).unwrap();
        let updated = store.get_cluster(&cluster.name).unwrap().unwrap();
        assert_eq!(updated.reason(), "probe failed");

        // Delete
        store.delete_cluster(&cluster.name).unwrap();
        assert!(store.get_cluster(&cluster.name).unwrap().is_none());
    }

    #[test]
    fn add_conflicts_on_existing_name() {
        let (store, _dir) = create_test_store();
        let cluster = create_test_cluster("east-1", 0);

        store.add_cluster(&cluster).unwrap();
        let result = store.add_cluster(&cluster);
        assert!(matches!(result, Err(StoreError::AlreadyExists)));
    }

    #[test]
    fn delete_missing_is_not_found() {
        let (store, _dir) = create_test_store();
        let name = ClusterName::new("ghost").unwrap();

        let result = store.delete_cluster(&name);
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[test]
    fn concurrent_adds_admit_one() {
        let (store, _dir) = create_test_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.add_cluster(&create_test_cluster("race", 0)))
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn list_sorted_newest_first() {
        let (store, _dir) = create_test_store();
        store.add_cluster(&create_test_cluster("old", 30)).unwrap();
        store.add_cluster(&create_test_cluster("mid", 20)).unwrap();
        store.add_cluster(&create_test_cluster("new", 10)).unwrap();

        let names: Vec<_> = store
            .list_clusters(&ListOptions::default())
            .unwrap()
            .into_iter()
            .map(|c| c.name.to_string())
            .collect();
        assert_eq!(names, ["new", "mid", "old"]);

        let ascending = ListOptions {
            sort: SortOrder::CreateTimeAscending,
            ..Default::default()
        };
        let first = &store.list_clusters(&ascending).unwrap()[0];
        assert_eq!(first.name.as_str(), "old");
    }

    #[test]
    fn list_filters_and_paginates() {
        let (store, _dir) = create_test_store();
        for i in 0..5 {
            store
                .add_cluster(&create_test_cluster(&format!("prod-{i}"), i))
                .unwrap();
        }
        store.add_cluster(&create_test_cluster("dev-0", 0)).unwrap();

        let filter = ClusterFilter::by_name("prod");
        assert_eq!(store.count_clusters(&filter).unwrap(), 5);
        assert_eq!(store.count_clusters(&ClusterFilter::default()).unwrap(), 6);

        let options = ListOptions {
            filter,
            page: Some(2),
            page_size: Some(2),
            sort: SortOrder::CreateTimeDescending,
        };
        let page: Vec<_> = store
            .list_clusters(&options)
            .unwrap()
            .into_iter()
            .map(|c| c.name.to_string())
            .collect();
        // prod-0 is newest, prod-4 oldest
        assert_eq!(page, ["prod-2", "prod-3"]);

        let beyond = ListOptions {
            page: Some(usize::MAX),
            page_size: Some(2),
            ..Default::default()
        };
        assert!(store.list_clusters(&beyond).unwrap().is_empty());
    }

    #[test]
    fn create_time_index_updated_on_change() {
        let (store, _dir) = create_test_store();
        let mut local = create_test_cluster("local", 0);
        store.add_cluster(&create_test_cluster("east-1", 5)).unwrap();
        store.add_cluster(&local).unwrap();

        local.create_time = local_cluster_created_time();
        store.put_cluster(&local).unwrap();

        let clusters = store.list_clusters(&ListOptions::default()).unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[1].name.as_str(), "local");
        assert_eq!(store.count_clusters(&ClusterFilter::default()).unwrap(), 2);
    }
}
