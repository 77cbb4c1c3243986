//! End-to-end cluster lifecycle tests against a real `RocksDB` registry and
//! an in-memory control plane.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hubfleet_control::{
    ClusterLifecycle, ClusterLifecycleService, ClusterName, ClusterStatus, ControlConfig,
    ControlError, CreateClusterRequest, CreateNamespaceRequest,
};
use hubfleet_membership::{GatewayOp, MockGateway};
use hubfleet_store::{
    Cluster, ClusterFilter, ListOptions, Result as StoreResult, RocksStore, Store, StoreError,
};
use tempfile::TempDir;

const EAST_KUBECONFIG: &str = "server: https://10.0.0.1:6443";
const EAST_NEW_KUBECONFIG: &str = "server: https://10.0.0.2:6443";

/// A registry that can be told to fail its next write.
struct FaultyStore {
    inner: RocksStore,
    fail_next_get: AtomicBool,
    fail_next_add: AtomicBool,
    fail_next_delete: AtomicBool,
}

impl FaultyStore {
    fn new(inner: RocksStore) -> Self {
        Self {
            inner,
            fail_next_get: AtomicBool::new(false),
            fail_next_add: AtomicBool::new(false),
            fail_next_delete: AtomicBool::new(false),
        }
    }
}

impl Store for FaultyStore {
    fn get_cluster(&self, name: &ClusterName) -> StoreResult<Option<Cluster>> {
        if self.fail_next_get.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected get failure".to_string()));
        }
        self.inner.get_cluster(name)
    }

    fn add_cluster(&self, cluster: &Cluster) -> StoreResult<()> {
        if self.fail_next_add.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected add failure".to_string()));
        }
        self.inner.add_cluster(cluster)
    }

    fn put_cluster(&self, cluster: &Cluster) -> StoreResult<()> {
        self.inner.put_cluster(cluster)
    }

    fn delete_cluster(&self, name: &ClusterName) -> StoreResult<()> {
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected delete failure".to_string()));
        }
        self.inner.delete_cluster(name)
    }

    fn list_clusters(&self, options: &ListOptions) -> StoreResult<Vec<Cluster>> {
        self.inner.list_clusters(options)
    }

    fn count_clusters(&self, filter: &ClusterFilter) -> StoreResult<u64> {
        self.inner.count_clusters(filter)
    }
}

struct Harness {
    service: Arc<ClusterLifecycleService<FaultyStore, MockGateway>>,
    store: Arc<FaultyStore>,
    gateway: Arc<MockGateway>,
    _dir: TempDir,
}

fn setup() -> Harness {
    setup_with(ControlConfig::default())
}

fn setup_with(config: ControlConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FaultyStore::new(RocksStore::open(dir.path()).unwrap()));
    let gateway = Arc::new(MockGateway::new());
    let service =
        ClusterLifecycleService::new(Arc::clone(&store), Arc::clone(&gateway), config).unwrap();
    Harness {
        service: Arc::new(service),
        store,
        gateway,
        _dir: dir,
    }
}

fn name(s: &str) -> ClusterName {
    ClusterName::new(s).unwrap()
}

/// Registered member names, excluding the hub.
fn registered(store: &FaultyStore) -> Vec<ClusterName> {
    let mut names: Vec<_> = store
        .list_clusters(&ListOptions::default())
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .filter(|n| !n.is_local())
        .collect();
    names.sort();
    names
}

/// Every registered member has a membership and vice versa.
fn assert_symmetric(harness: &Harness) {
    assert_eq!(registered(&harness.store), harness.gateway.members());
}

/// `name` is registered and joined with its original credential, alone.
fn assert_restored(harness: &Harness, name: &ClusterName) {
    let record = harness.store.get_cluster(name).unwrap().unwrap();
    assert_eq!(record.kube_config.as_deref(), Some(EAST_KUBECONFIG));
    assert_eq!(record.api_server_url, "https://10.0.0.1:6443");
    assert_eq!(harness.gateway.members(), [name.clone()]);
    assert_eq!(
        harness.gateway.credential_of(name).unwrap().expose(),
        EAST_KUBECONFIG
    );
    assert_symmetric(harness);
}

#[tokio::test]
async fn create_modify_delete_scenario() {
    let harness = setup();
    let east = name("east-1");

    let created = harness
        .service
        .create_cluster(CreateClusterRequest::new(east.clone(), EAST_KUBECONFIG))
        .await
        .unwrap();
    assert_eq!(created.status, ClusterStatus::Healthy);
    assert_eq!(created.api_server_url, "https://10.0.0.1:6443");
    assert_symmetric(&harness);

    let modified = harness
        .service
        .modify_cluster(
            &east,
            CreateClusterRequest::new(east.clone(), EAST_NEW_KUBECONFIG),
        )
        .await
        .unwrap();
    assert_eq!(modified.api_server_url, "https://10.0.0.2:6443");
    assert_eq!(
        harness.gateway.credential_of(&east).unwrap().expose(),
        EAST_NEW_KUBECONFIG
    );
    assert_eq!(harness.gateway.call_count(GatewayOp::Rename), 1);
    assert_symmetric(&harness);

    let namespace = || CreateNamespaceRequest {
        namespace: "team-a".to_string(),
    };
    let first = harness
        .service
        .create_cluster_namespace(&east, namespace())
        .await
        .unwrap();
    let second = harness
        .service
        .create_cluster_namespace(&east, namespace())
        .await
        .unwrap();
    assert!(!first.exists);
    assert!(second.exists);

    harness.service.delete_cluster(&east).await.unwrap();
    assert!(harness.store.get_cluster(&east).unwrap().is_none());
    assert!(!harness.gateway.is_member(&east));

    let result = harness.service.delete_cluster(&ClusterName::local()).await;
    assert!(matches!(result, Err(ControlError::LocalClusterImmutable)));
    assert_symmetric(&harness);
}

#[derive(Debug, Clone, Copy)]
enum FailAt {
    DetachOld,
    DeleteOldRecord,
    AddNewRecord,
    RenameTransitional,
}

async fn assert_rollback(fail_at: FailAt) {
    let harness = setup();
    let old = name("east-1");
    let new = name("east-2");
    harness
        .service
        .create_cluster(CreateClusterRequest::new(old.clone(), EAST_KUBECONFIG))
        .await
        .unwrap();
    let before = harness.store.get_cluster(&old).unwrap().unwrap();

    match fail_at {
        FailAt::DetachOld => harness.gateway.fail_once(GatewayOp::Detach),
        FailAt::DeleteOldRecord => harness.store.fail_next_delete.store(true, Ordering::SeqCst),
        FailAt::AddNewRecord => harness.store.fail_next_add.store(true, Ordering::SeqCst),
        FailAt::RenameTransitional => harness.gateway.fail_once(GatewayOp::Rename),
    }

    let result = harness
        .service
        .modify_cluster(&old, CreateClusterRequest::new(new.clone(), EAST_NEW_KUBECONFIG))
        .await;
    assert!(result.is_err(), "{fail_at:?} should fail the modify");

    let after = harness.store.get_cluster(&old).unwrap().unwrap();
    assert_eq!(after.kube_config, before.kube_config, "{fail_at:?}");
    assert_eq!(after.api_server_url, before.api_server_url, "{fail_at:?}");
    assert!(harness.store.get_cluster(&new).unwrap().is_none(), "{fail_at:?}");

    assert_eq!(harness.gateway.members(), [old.clone()], "{fail_at:?}");
    assert_eq!(
        harness.gateway.credential_of(&old).unwrap().expose(),
        EAST_KUBECONFIG,
        "{fail_at:?}"
    );
    assert_symmetric(&harness);
}

#[tokio::test]
async fn rollback_when_detach_old_fails() {
    assert_rollback(FailAt::DetachOld).await;
}

#[tokio::test]
async fn rollback_when_delete_old_record_fails() {
    assert_rollback(FailAt::DeleteOldRecord).await;
}

#[tokio::test]
async fn rollback_when_add_new_record_fails() {
    assert_rollback(FailAt::AddNewRecord).await;
}

#[tokio::test]
async fn rollback_when_rename_fails() {
    assert_rollback(FailAt::RenameTransitional).await;
}

#[tokio::test]
async fn create_detaches_when_registry_add_fails() {
    let harness = setup();
    let east = name("east-1");
    harness.store.fail_next_add.store(true, Ordering::SeqCst);

    let result = harness
        .service
        .create_cluster(CreateClusterRequest::new(east.clone(), EAST_KUBECONFIG))
        .await;

    assert!(matches!(result, Err(ControlError::Registry { op: "add", .. })));
    assert!(!harness.gateway.is_member(&east));
    assert_symmetric(&harness);
}

#[tokio::test]
async fn registry_lookup_failure_names_operation_and_cluster() {
    let harness = setup();
    let east = name("east-1");
    harness.store.fail_next_get.store(true, Ordering::SeqCst);

    let result = harness
        .service
        .create_cluster(CreateClusterRequest::new(east.clone(), EAST_KUBECONFIG))
        .await;

    match result {
        Err(ControlError::Registry { op, cluster, .. }) => {
            assert_eq!(op, "get");
            assert_eq!(cluster, east);
        }
        other => panic!("expected a registry error, got {other:?}"),
    }
    assert_eq!(harness.gateway.call_count(GatewayOp::Join), 0);
}

#[tokio::test(start_paused = true)]
async fn rename_timeout_unwinds_committed_steps() {
    let harness = setup_with(ControlConfig {
        gateway_timeout_seconds: 1,
        ..ControlConfig::default()
    });
    let old = name("east-1");
    harness
        .service
        .create_cluster(CreateClusterRequest::new(old.clone(), EAST_KUBECONFIG))
        .await
        .unwrap();
    harness
        .gateway
        .set_delay(GatewayOp::Rename, Duration::from_secs(5));

    let result = harness
        .service
        .modify_cluster(
            &old,
            CreateClusterRequest::new(name("east-2"), EAST_NEW_KUBECONFIG),
        )
        .await;

    assert!(matches!(
        result,
        Err(ControlError::GatewayTimeout { op: "rename", .. })
    ));
    assert!(harness.store.get_cluster(&name("east-2")).unwrap().is_none());
    assert_restored(&harness, &old);
}

#[tokio::test(start_paused = true)]
async fn abandoned_modify_unwinds_in_background() {
    let harness = setup();
    let east = name("east-1");
    harness
        .service
        .create_cluster(CreateClusterRequest::new(east.clone(), EAST_KUBECONFIG))
        .await
        .unwrap();
    harness.gateway.set_latency(Duration::from_millis(100));

    // Gives up while the transitional membership is being probed.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(150),
        harness.service.modify_cluster(
            &east,
            CreateClusterRequest::new(east.clone(), EAST_NEW_KUBECONFIG),
        ),
    )
    .await;
    assert!(abandoned.is_err());

    // Waits on the name lock held until unwinding finishes.
    harness.service.get_cluster(&east).await.unwrap();

    assert_eq!(harness.gateway.call_count(GatewayOp::Rename), 0);
    assert_restored(&harness, &east);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_admit_exactly_one() {
    let harness = setup();
    let east = name("east-1");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&harness.service);
            let east = east.clone();
            tokio::spawn(async move {
                service
                    .create_cluster(CreateClusterRequest::new(east, EAST_KUBECONFIG))
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
        e,
        ControlError::ClusterExistsInRegistry(_) | ControlError::ClusterExistsInControlPlane(_)
    )));
    assert_eq!(harness.gateway.members(), [east]);
    assert_symmetric(&harness);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_operations_on_different_names() {
    let harness = setup();

    let tasks: Vec<_> = (0..6)
        .map(|i| {
            let service = Arc::clone(&harness.service);
            tokio::spawn(async move {
                let cluster = name(&format!("edge-{i}"));
                service
                    .create_cluster(CreateClusterRequest::new(cluster.clone(), EAST_KUBECONFIG))
                    .await?;
                service
                    .modify_cluster(
                        &cluster,
                        CreateClusterRequest::new(cluster.clone(), EAST_NEW_KUBECONFIG),
                    )
                    .await?;
                if i % 2 == 0 {
                    service.delete_cluster(&cluster).await?;
                }
                Ok::<_, ControlError>(())
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(registered(&harness.store), [name("edge-1"), name("edge-3"), name("edge-5")]);
    assert_symmetric(&harness);
}

#[tokio::test]
async fn local_cluster_is_immutable() {
    let harness = setup();
    let local = ClusterName::local();

    for request in [
        CreateClusterRequest::new(local.clone(), EAST_KUBECONFIG),
        CreateClusterRequest::new(name("renamed"), EAST_KUBECONFIG),
    ] {
        let result = harness.service.modify_cluster(&local, request).await;
        assert!(matches!(result, Err(ControlError::LocalClusterImmutable)));
    }

    let result = harness.service.delete_cluster(&local).await;
    assert!(matches!(result, Err(ControlError::LocalClusterImmutable)));

    let detail = harness.service.get_cluster(&local).await.unwrap();
    assert_eq!(detail.cluster.status, ClusterStatus::Healthy);
    assert_eq!(harness.gateway.call_count(GatewayOp::Join), 0);
}
