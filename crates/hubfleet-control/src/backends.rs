//! Bounded, context-wrapped access to the registry and control plane.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hubfleet_core::ClusterName;
use hubfleet_membership::{ControlPlaneGateway, Credential, GatewayError, NamespaceOutcome};
use hubfleet_store::{Cluster, ClusterHealth, Store};

use crate::cache::ResourceInfoCache;
use crate::error::{ControlError, Result};
use crate::types::ResourceInfo;

/// The registry, gateway and resource cache shared by the service and its sagas.
pub struct Backends<S: Store, G: ControlPlaneGateway> {
    store: Arc<S>,
    gateway: Arc<G>,
    cache: Arc<ResourceInfoCache<G>>,
    gateway_timeout: Duration,
}

impl<S: Store, G: ControlPlaneGateway> Clone for Backends<S, G> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            gateway: Arc::clone(&self.gateway),
            cache: Arc::clone(&self.cache),
            gateway_timeout: self.gateway_timeout,
        }
    }
}

impl<S: Store, G: ControlPlaneGateway> Backends<S, G> {
    /// Bundle the collaborators.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        gateway: Arc<G>,
        cache: Arc<ResourceInfoCache<G>>,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            cache,
            gateway_timeout,
        }
    }

    /// The registry.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The control plane gateway.
    #[must_use]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// The resource snapshot cache.
    #[must_use]
    pub fn cache(&self) -> &ResourceInfoCache<G> {
        &self.cache
    }

    /// Run a gateway call under the configured timeout.
    async fn bounded<T>(
        &self,
        op: &'static str,
        cluster: &ClusterName,
        call: impl Future<Output = std::result::Result<T, GatewayError>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(result) => result.map_err(|e| ControlError::gateway(op, cluster, e)),
            Err(_) => Err(ControlError::GatewayTimeout {
                op,
                cluster: cluster.clone(),
                timeout: self.gateway_timeout,
            }),
        }
    }

    /// Join a cluster, returning its endpoint.
    pub(crate) async fn join(&self, name: &ClusterName, credential: &Credential) -> Result<String> {
        let endpoint = self
            .bounded("join", name, self.gateway.join(name, credential))
            .await?;
        tracing::info!(cluster = %name, endpoint, "Joined control plane");
        Ok(endpoint)
    }

    /// Detach a cluster.
    pub(crate) async fn detach(&self, name: &ClusterName) -> Result<()> {
        self.bounded("detach", name, self.gateway.detach(name)).await?;
        self.cache.invalidate(name);
        tracing::info!(cluster = %name, "Detached from control plane");
        Ok(())
    }

    /// Rename a membership.
    pub(crate) async fn rename(&self, old: &ClusterName, new: &ClusterName) -> Result<()> {
        self.bounded("rename", old, self.gateway.rename(old, new))
            .await?;
        self.cache.invalidate(old);
        self.cache.invalidate(new);
        tracing::info!(old = %old, new = %new, "Renamed control plane membership");
        Ok(())
    }

    /// Create a namespace in a member.
    pub(crate) async fn create_namespace(
        &self,
        name: &ClusterName,
        namespace: &str,
    ) -> Result<NamespaceOutcome> {
        match tokio::time::timeout(
            self.gateway_timeout,
            self.gateway.create_namespace(name, namespace),
        )
        .await
        {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(GatewayError::NoPermission(_))) => Err(ControlError::NamespaceNoPermission {
                cluster: name.clone(),
                namespace: namespace.to_string(),
            }),
            Ok(Err(e)) => Err(ControlError::gateway("create_namespace", name, e)),
            Err(_) => Err(ControlError::GatewayTimeout {
                op: "create_namespace",
                cluster: name.clone(),
                timeout: self.gateway_timeout,
            }),
        }
    }

    /// Probe a cluster through the cache and record the result as its health.
    ///
    /// `probe_as` is the membership name to probe, which differs from the
    /// record's name while a cluster is joined under a transitional name.
    /// Probe failures only mark the cluster unhealthy.
    pub(crate) async fn refresh_health(
        &self,
        cluster: &mut Cluster,
        probe_as: &ClusterName,
    ) -> ResourceInfo {
        match self.cache.get(probe_as).await {
            Ok(info) => {
                cluster.health = ClusterHealth::Healthy;
                info
            }
            Err(e) => {
                tracing::warn!(cluster = %cluster.name, error = %e, "Cluster probe failed");
                cluster.health =
                    ClusterHealth::unhealthy(format!("Failed to get cluster resource info: {e}"));
                ResourceInfo::default()
            }
        }
    }

    /// Join a cluster and record it, detaching again if the record is refused.
    pub(crate) async fn register(&self, mut cluster: Cluster, credential: Credential) -> Result<Cluster> {
        let name = cluster.name.clone();
        cluster.api_server_url = self.join(&name, &credential).await?;
        self.refresh_health(&mut cluster, &name).await;

        if let Err(e) = self.add(&cluster) {
            tracing::warn!(cluster = %name, error = %e, "Registry add failed, detaching");
            if let Err(undo) = self.detach(&name).await {
                tracing::error!(
                    cluster = %name,
                    error = %undo,
                    "Failed to detach after registry add failure"
                );
            }
            return Err(e);
        }
        Ok(cluster)
    }

    /// Remove a record and detach its cluster, restoring the record if the
    /// detach fails for any reason other than a missing membership.
    pub(crate) async fn deregister(&self, cluster: Cluster) -> Result<Cluster> {
        let name = &cluster.name;
        self.delete(name)?;

        match self.detach(name).await {
            Ok(()) => {}
            Err(e) if e.is_not_joined() => {
                tracing::warn!(cluster = %name, "Cluster was already detached");
            }
            Err(e) => {
                tracing::warn!(cluster = %name, error = %e, "Detach failed, restoring record");
                if let Err(undo) = self.add(&cluster) {
                    tracing::error!(
                        cluster = %name,
                        error = %undo,
                        "Failed to restore record after detach failure"
                    );
                }
                return Err(e);
            }
        }

        self.cache.invalidate(name);
        Ok(cluster)
    }

    /// Look up a record.
    pub(crate) fn find(&self, name: &ClusterName) -> Result<Option<Cluster>> {
        self.store
            .get_cluster(name)
            .map_err(|e| ControlError::registry("get", name, e))
    }

    /// Load a record, failing if it is absent.
    pub(crate) fn load(&self, name: &ClusterName) -> Result<Cluster> {
        self.find(name)?
            .ok_or_else(|| ControlError::ClusterNotFound(name.clone()))
    }

    /// Insert a record.
    pub(crate) fn add(&self, cluster: &Cluster) -> Result<()> {
        self.store
            .add_cluster(cluster)
            .map_err(|e| ControlError::registry("add", &cluster.name, e))
    }

    /// Upsert a record.
    pub(crate) fn put(&self, cluster: &Cluster) -> Result<()> {
        self.store
            .put_cluster(cluster)
            .map_err(|e| ControlError::registry("put", &cluster.name, e))
    }

    /// Delete a record.
    pub(crate) fn delete(&self, name: &ClusterName) -> Result<()> {
        self.store
            .delete_cluster(name)
            .map_err(|e| ControlError::registry("delete", name, e))
    }
}
