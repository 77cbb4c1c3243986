//! Resource snapshot cache for fast status queries.
//!
//! This module provides a per-cluster TTL cache of [`ResourceInfo`] so that
//! bursts of status queries do not each probe the member cluster. Concurrent
//! misses for the same cluster share one upstream fetch; different clusters
//! are fetched independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hubfleet_core::ClusterName;
use hubfleet_membership::ControlPlaneGateway;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{ControlError, Result};
use crate::types::ResourceInfo;

#[derive(Debug, Clone)]
struct CachedInfo {
    info: ResourceInfo,
    fetched_at: Instant,
}

type Slot = Arc<tokio::sync::Mutex<Option<CachedInfo>>>;

/// A TTL cache of cluster resource snapshots.
pub struct ResourceInfoCache<G: ControlPlaneGateway> {
    gateway: Arc<G>,
    ttl: Duration,
    fetch_timeout: Duration,
    slots: Mutex<HashMap<ClusterName, Slot>>,
}

impl<G: ControlPlaneGateway> ResourceInfoCache<G> {
    /// Create an empty cache.
    ///
    /// Each upstream fetch is bounded by `fetch_timeout`.
    #[must_use]
    pub fn new(gateway: Arc<G>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            gateway,
            ttl,
            fetch_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Get the snapshot for a cluster, fetching it if absent or expired.
    ///
    /// Failed fetches are not cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream fetch fails or times out.
    pub async fn get(&self, name: &ClusterName) -> Result<ResourceInfo> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(name.clone()).or_default())
        };

        // Holding the slot across the fetch collapses concurrent misses.
        let mut cached = slot.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.info.clone());
            }
        }

        let info = self.fetch(name).await?;
        *cached = Some(CachedInfo {
            info: info.clone(),
            fetched_at: Instant::now(),
        });
        Ok(info)
    }

    /// Drop the snapshot for a cluster.
    pub fn invalidate(&self, name: &ClusterName) {
        if self.slots.lock().remove(name).is_some() {
            tracing::debug!(cluster = %name, "Invalidated resource info");
        }
    }

    /// Get the number of tracked clusters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    async fn fetch(&self, name: &ClusterName) -> Result<ResourceInfo> {
        let info = tokio::time::timeout(self.fetch_timeout, self.gateway.cluster_info(name))
            .await
            .map_err(|_| ControlError::GatewayTimeout {
                op: "cluster_info",
                cluster: name.clone(),
                timeout: self.fetch_timeout,
            })?
            .map_err(|e| ControlError::gateway("cluster_info", name, e))?;

        tracing::debug!(cluster = %name, "Fetched resource info");
        Ok(ResourceInfo::from(&info))
    }
}

impl<G: ControlPlaneGateway> std::fmt::Debug for ResourceInfoCache<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceInfoCache")
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
