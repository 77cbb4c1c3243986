//! Cluster lifecycle service implementation.
//!
//! This module provides the `ClusterLifecycle` trait and the
//! `ClusterLifecycleService` implementation that keeps the cluster registry
//! and control plane memberships in step.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use hubfleet_core::ClusterName;
use hubfleet_membership::{ControlPlaneGateway, Credential};
use hubfleet_store::{Cluster, ClusterFilter, ListOptions, SortOrder, Store};
use tokio_util::sync::CancellationToken;

use crate::backends::Backends;
use crate::bootstrap;
use crate::cache::ResourceInfoCache;
use crate::error::{ControlError, Result};
use crate::locks::{NameGuard, NameLocks};
use crate::migration::{identity_saga, IdentityMigration};
use crate::saga::Saga;
use crate::types::{
    CloudCluster, ClusterBase, ClusterDetail, ClusterList, ClusterQuery, ControlConfig,
    CreateClusterRequest, CreateNamespaceRequest, CreateNamespaceResponse, ModifyClusterRequest,
};

/// Trait defining the cluster lifecycle operations.
///
/// Every operation keeps the registry and the control plane consistent: a
/// failure part way through undoes the side effects already performed.
#[async_trait]
pub trait ClusterLifecycle: Send + Sync {
    // =========================================================================
    // Registration
    // =========================================================================

    /// Join a cluster and register it.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::LocalClusterReserved` for the hub name,
    /// `ControlError::ClusterExistsInRegistry` or
    /// `ControlError::ClusterExistsInControlPlane` on conflicts, and
    /// `ControlError::KubeConfigMissing` or
    /// `ControlError::KubeConfigSecretUnsupported` without a usable kubeconfig.
    async fn create_cluster(&self, request: CreateClusterRequest) -> Result<ClusterBase>;

    /// Join and register a cluster discovered through a cloud provider.
    ///
    /// # Errors
    ///
    /// Same as [`ClusterLifecycle::create_cluster`].
    async fn create_provider_cluster(
        &self,
        request: CreateClusterRequest,
        cloud: CloudCluster,
    ) -> Result<ClusterBase>;

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Get a cluster with a fresh health status and resource snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ClusterNotFound` if the cluster isn't registered.
    async fn get_cluster(&self, name: &ClusterName) -> Result<ClusterDetail>;

    /// List registered clusters, newest first.
    async fn list_clusters(&self, query: &ClusterQuery) -> Result<ClusterList>;

    // =========================================================================
    // Reconfiguration
    // =========================================================================

    /// Modify a cluster.
    ///
    /// Changing the name or credential replaces the control plane membership;
    /// other changes only rewrite the record.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::LocalClusterImmutable` when the hub is involved
    /// and `ControlError::ClusterNotFound` if the cluster isn't registered.
    async fn modify_cluster(
        &self,
        name: &ClusterName,
        request: ModifyClusterRequest,
    ) -> Result<ClusterBase>;

    /// Detach a cluster and remove its record.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::LocalClusterImmutable` for the hub and
    /// `ControlError::ClusterNotFound` if the cluster isn't registered.
    async fn delete_cluster(&self, name: &ClusterName) -> Result<ClusterBase>;

    /// Create a namespace inside a member cluster.
    ///
    /// An existing namespace is reported through `exists`, not as an error.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NamespaceNoPermission` if the member refuses.
    async fn create_cluster_namespace(
        &self,
        name: &ClusterName,
        request: CreateNamespaceRequest,
    ) -> Result<CreateNamespaceResponse>;
}

/// The main cluster lifecycle service implementation.
pub struct ClusterLifecycleService<S: Store, G: ControlPlaneGateway> {
    backends: Backends<S, G>,
    locks: NameLocks,
    identity_saga: Arc<Saga<IdentityMigration<S, G>>>,
    config: ControlConfig,
}

impl<S, G> ClusterLifecycleService<S, G>
where
    S: Store + 'static,
    G: ControlPlaneGateway + 'static,
{
    /// Create a new service, registering the hub cluster first.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub cluster record cannot be written.
    pub fn new(store: Arc<S>, gateway: Arc<G>, config: ControlConfig) -> Result<Self> {
        bootstrap::ensure_local(store.as_ref(), gateway.as_ref())?;

        let cache = Arc::new(ResourceInfoCache::new(
            Arc::clone(&gateway),
            config.resource_info_ttl(),
            config.gateway_timeout(),
        ));
        Ok(Self {
            backends: Backends::new(store, gateway, cache, config.gateway_timeout()),
            locks: NameLocks::new(),
            identity_saga: Arc::new(identity_saga()),
            config,
        })
    }

    /// Create with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub cluster record cannot be written.
    pub fn with_defaults(store: Arc<S>, gateway: Arc<G>) -> Result<Self> {
        Self::new(store, gateway, ControlConfig::default())
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        self.backends.store()
    }

    /// Get a reference to the gateway.
    #[must_use]
    pub fn gateway(&self) -> &G {
        self.backends.gateway()
    }

    /// Get the resource snapshot cache.
    #[must_use]
    pub fn cache(&self) -> &ResourceInfoCache<G> {
        self.backends.cache()
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// The kubeconfig to join with; references alone are not supported.
    fn credential_of(cluster: &Cluster) -> Result<Credential> {
        match (&cluster.kube_config, &cluster.kube_config_secret) {
            (Some(kube_config), _) => Ok(Credential::from_kubeconfig(kube_config.as_str())),
            (None, Some(_)) => Err(ControlError::KubeConfigSecretUnsupported),
            (None, None) => Err(ControlError::KubeConfigMissing),
        }
    }

    async fn create(
        &self,
        request: CreateClusterRequest,
        cloud: Option<CloudCluster>,
    ) -> Result<ClusterBase> {
        let name = request.name.clone();
        if name.is_local() {
            return Err(ControlError::LocalClusterReserved);
        }

        let guard = self.locks.lock(&name).await;

        if self.backends.find(&name)?.is_some() {
            return Err(ControlError::ClusterExistsInRegistry(name));
        }

        let mut cluster = request.into_cluster(None);
        if let Some(cloud) = cloud {
            cluster.provider = Some(cloud.provider_info());
            cluster.dashboard_url = cloud.dashboard_url;
        }
        let credential = Self::credential_of(&cluster)?;

        let backends = self.backends.clone();
        let cluster = run_detached("create", guard, async move {
            backends.register(cluster, credential).await
        })
        .await?;

        tracing::info!(cluster = %name, status = ?cluster.status(), "Created cluster");
        Ok(ClusterBase::from(cluster))
    }

    async fn migrate_identity(
        &self,
        guard: NameGuard,
        old: Cluster,
        new: Cluster,
    ) -> Result<ClusterBase> {
        if new.name != old.name && self.backends.find(&new.name)?.is_some() {
            return Err(ControlError::ClusterExistsInRegistry(new.name));
        }
        let credential = Self::credential_of(&new)?;

        let migration = IdentityMigration::new(self.backends.clone(), old, new, credential);
        let saga = Arc::clone(&self.identity_saga);
        let cancel = CancellationToken::new();
        // Dropping this future unwinds the saga instead of abandoning it.
        let _unwind_on_drop = cancel.clone().drop_guard();

        run_detached(
            "migrate_identity",
            guard,
            migrate(saga, migration, cancel),
        )
        .await
    }
}

/// Run the side-effecting part of an operation on its own task.
///
/// The task owns the name guard, so the name stays locked until the sequence
/// and any compensation finish, even if the caller stops waiting.
async fn run_detached<T, F>(op: &'static str, guard: NameGuard, work: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(async move {
        let _guard = guard;
        work.await
    })
    .await
    .map_err(|e| ControlError::Internal(format!("{op} task failed: {e}")))?
}

async fn migrate<S, G>(
    saga: Arc<Saga<IdentityMigration<S, G>>>,
    mut migration: IdentityMigration<S, G>,
    cancel: CancellationToken,
) -> Result<ClusterBase>
where
    S: Store + 'static,
    G: ControlPlaneGateway + 'static,
{
    tracing::info!(
        old = %migration.old.name,
        new = %migration.new.name,
        transitional = %migration.transitional,
        "Migrating cluster identity"
    );

    match saga.run_until_cancelled(&mut migration, &cancel).await {
        Ok(_) => {
            tracing::info!(
                old = %migration.old.name,
                new = %migration.new.name,
                "Migrated cluster identity"
            );
            Ok(ClusterBase::from(migration.new))
        }
        Err(failure) => {
            if !failure.fully_compensated() {
                let uncompensated: Vec<&str> = failure
                    .compensation_failures
                    .iter()
                    .map(|(step, _)| *step)
                    .collect();
                tracing::error!(
                    old = %migration.old.name,
                    new = %migration.new.name,
                    failed_step = failure.failed_step,
                    ?uncompensated,
                    "Identity migration left inconsistent state"
                );
            }
            Err(failure.error)
        }
    }
}

#[async_trait]
impl<S, G> ClusterLifecycle for ClusterLifecycleService<S, G>
where
    S: Store + 'static,
    G: ControlPlaneGateway + 'static,
{
    async fn create_cluster(&self, request: CreateClusterRequest) -> Result<ClusterBase> {
        self.create(request, None).await
    }

    async fn create_provider_cluster(
        &self,
        request: CreateClusterRequest,
        cloud: CloudCluster,
    ) -> Result<ClusterBase> {
        self.create(request, Some(cloud)).await
    }

    async fn get_cluster(&self, name: &ClusterName) -> Result<ClusterDetail> {
        // Held across the refresh so the put cannot resurrect a deleted record.
        let _guard = self.locks.lock(name).await;

        let mut cluster = self.backends.load(name)?;
        let resource_info = self.backends.refresh_health(&mut cluster, name).await;
        self.backends.put(&cluster)?;

        Ok(ClusterDetail {
            cluster: ClusterBase::from(&cluster),
            resource_info,
        })
    }

    async fn list_clusters(&self, query: &ClusterQuery) -> Result<ClusterList> {
        let filter = ClusterFilter::by_name(query.query.as_str());
        let options = ListOptions {
            filter: filter.clone(),
            page: (query.page > 0).then_some(query.page),
            page_size: (query.page_size > 0).then_some(query.page_size),
            sort: SortOrder::CreateTimeDescending,
        };

        let clusters = self.store().list_clusters(&options)?;
        let total = self.store().count_clusters(&filter)?;

        Ok(ClusterList {
            clusters: clusters.iter().map(ClusterBase::from).collect(),
            total,
        })
    }

    async fn modify_cluster(
        &self,
        name: &ClusterName,
        request: ModifyClusterRequest,
    ) -> Result<ClusterBase> {
        if name.is_local() || request.name.is_local() {
            return Err(ControlError::LocalClusterImmutable);
        }

        let guard = self.locks.lock_all(&[name, &request.name]).await;

        let old = self.backends.load(name)?;
        let new = request.into_cluster(Some(&old));

        if new.name != old.name || new.credentials_differ(&old) {
            return self.migrate_identity(guard, old, new).await;
        }

        self.backends.put(&new)?;
        tracing::info!(cluster = %name, "Updated cluster");
        Ok(ClusterBase::from(new))
    }

    async fn delete_cluster(&self, name: &ClusterName) -> Result<ClusterBase> {
        if name.is_local() {
            return Err(ControlError::LocalClusterImmutable);
        }

        let guard = self.locks.lock(name).await;

        let cluster = self.backends.load(name)?;
        let backends = self.backends.clone();
        let cluster = run_detached("delete", guard, async move {
            backends.deregister(cluster).await
        })
        .await?;

        tracing::info!(cluster = %name, "Deleted cluster");
        Ok(ClusterBase::from(cluster))
    }

    async fn create_cluster_namespace(
        &self,
        name: &ClusterName,
        request: CreateNamespaceRequest,
    ) -> Result<CreateNamespaceResponse> {
        if request.namespace.trim().is_empty() {
            return Err(ControlError::InvalidRequest(
                "namespace must not be empty".to_string(),
            ));
        }

        self.backends.load(name)?;

        let outcome = self
            .backends
            .create_namespace(name, &request.namespace)
            .await?;
        tracing::info!(
            cluster = %name,
            namespace = %request.namespace,
            existed = outcome.existed(),
            "Ensured namespace"
        );

        Ok(CreateNamespaceResponse {
            exists: outcome.existed(),
        })
    }
}
