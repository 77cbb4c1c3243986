//! Registration of the hub cluster.
//!
//! The hub the control plane runs on is always present in the registry under
//! the reserved name `local`. [`ensure_local`] runs once before the service
//! accepts operations.

use chrono::Utc;
use hubfleet_core::ClusterName;
use hubfleet_membership::ControlPlaneGateway;
use hubfleet_store::{local_cluster_created_time, Cluster, ClusterHealth, Store, StoreError};

use crate::error::{ControlError, Result};

/// Description stored on the hub cluster record.
pub const LOCAL_CLUSTER_DESCRIPTION: &str = "The hub manage cluster where the control plane runs.";

/// Build the canonical hub cluster record.
#[must_use]
pub fn local_cluster(hub_endpoint: String) -> Cluster {
    let mut cluster = Cluster::new(ClusterName::local());
    cluster.description = LOCAL_CLUSTER_DESCRIPTION.to_string();
    cluster.api_server_url = hub_endpoint;
    cluster.health = ClusterHealth::Healthy;
    cluster.create_time = local_cluster_created_time();
    cluster.update_time = Utc::now();
    cluster
}

/// Make sure the hub cluster record exists with its canonical creation time.
///
/// A concurrent insert of the same record is treated as success.
///
/// # Errors
///
/// Returns an error if the registry cannot be read or written.
pub fn ensure_local<S: Store, G: ControlPlaneGateway>(store: &S, gateway: &G) -> Result<()> {
    let name = ClusterName::local();

    match store.get_cluster(&name)? {
        None => match store.add_cluster(&local_cluster(gateway.hub_endpoint())) {
            Ok(()) => {
                tracing::info!(cluster = %name, "Registered hub cluster");
                Ok(())
            }
            Err(StoreError::AlreadyExists) => {
                tracing::debug!(cluster = %name, "Hub cluster registered concurrently");
                Ok(())
            }
            Err(e) => Err(ControlError::registry("add", &name, e)),
        },
        Some(mut cluster) if cluster.create_time < local_cluster_created_time() => {
            cluster.create_time = local_cluster_created_time();
            store
                .put_cluster(&cluster)
                .map_err(|e| ControlError::registry("put", &name, e))?;
            tracing::info!(cluster = %name, "Corrected hub cluster creation time");
            Ok(())
        }
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hubfleet_membership::MockGateway;
    use hubfleet_store::RocksStore;
    use tempfile::TempDir;

    fn setup() -> (RocksStore, MockGateway, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, MockGateway::new(), dir)
    }

    #[test]
    fn inserts_missing_local_cluster() {
        let (store, gateway, _dir) = setup();

        ensure_local(&store, &gateway).unwrap();

        let local = store.get_cluster(&ClusterName::local()).unwrap().unwrap();
        assert_eq!(local.description, LOCAL_CLUSTER_DESCRIPTION);
        assert_eq!(local.api_server_url, gateway.hub_endpoint());
        assert_eq!(local.create_time, local_cluster_created_time());
        assert_eq!(local.reason(), "");
    }

    #[test]
    fn is_idempotent() {
        let (store, gateway, _dir) = setup();

        ensure_local(&store, &gateway).unwrap();
        ensure_local(&store, &gateway).unwrap();

        let all = store
            .list_clusters(&hubfleet_store::ListOptions::default())
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn corrects_old_creation_time() {
        let (store, gateway, _dir) = setup();
        let mut stale = local_cluster("https://old".to_string());
        stale.create_time = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        store.add_cluster(&stale).unwrap();

        ensure_local(&store, &gateway).unwrap();

        let local = store.get_cluster(&ClusterName::local()).unwrap().unwrap();
        assert_eq!(local.create_time, local_cluster_created_time());
        assert_eq!(local.api_server_url, "https://old");
    }

    #[test]
    fn keeps_newer_creation_time() {
        let (store, gateway, _dir) = setup();
        let mut newer = local_cluster("https://hub".to_string());
        newer.create_time = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        store.add_cluster(&newer).unwrap();

        ensure_local(&store, &gateway).unwrap();

        let local = store.get_cluster(&ClusterName::local()).unwrap().unwrap();
        assert_eq!(local.create_time, newer.create_time);
    }
}
