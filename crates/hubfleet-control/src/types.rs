//! Request and response types for cluster lifecycle operations.
//!
//! These types define the API contracts for registering, inspecting and
//! reconfiguring member clusters.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hubfleet_core::ClusterName;
use hubfleet_membership::ClusterInfo;
use hubfleet_store::{Cluster, ClusterStatus, ProviderInfo};
use serde::{Deserialize, Serialize};

/// Request to create or reconfigure a cluster.
///
/// A modify request replaces every field of the stored record except the
/// creation time, provider metadata and observed endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClusterRequest {
    /// Target cluster name.
    pub name: ClusterName,
    /// Display name.
    #[serde(default)]
    pub alias: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Icon URL.
    #[serde(default)]
    pub icon: String,
    /// Organizational labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Raw kubeconfig.
    #[serde(default)]
    pub kube_config: Option<String>,
    /// Reference to an externally stored kubeconfig.
    #[serde(default)]
    pub kube_config_secret: Option<String>,
    /// Dashboard endpoint.
    #[serde(default)]
    pub dashboard_url: String,
}

/// Request to create a cluster.
pub type CreateClusterRequest = ClusterRequest;

/// Request to modify a cluster.
pub type ModifyClusterRequest = ClusterRequest;

impl ClusterRequest {
    /// Create a request with the given name and kubeconfig.
    #[must_use]
    pub fn new(name: ClusterName, kube_config: impl Into<String>) -> Self {
        Self {
            name,
            alias: String::new(),
            description: String::new(),
            icon: String::new(),
            labels: BTreeMap::new(),
            kube_config: Some(kube_config.into()),
            kube_config_secret: None,
            dashboard_url: String::new(),
        }
    }

    /// Build the record this request describes.
    ///
    /// With a `base`, the record starts as a copy of it so that fields the
    /// request does not carry survive. Blank credential fields become `None`.
    #[must_use]
    pub fn into_cluster(self, base: Option<&Cluster>) -> Cluster {
        let now = Utc::now();
        let mut cluster = base.map_or_else(|| Cluster::new(self.name.clone()), Clone::clone);

        cluster.name = self.name;
        cluster.alias = self.alias;
        cluster.description = self.description;
        cluster.icon = self.icon;
        cluster.labels = self.labels;
        cluster.kube_config = self.kube_config.filter(|s| !s.trim().is_empty());
        cluster.kube_config_secret = self.kube_config_secret.filter(|s| !s.trim().is_empty());
        cluster.dashboard_url = self.dashboard_url;
        cluster.update_time = now;
        if base.is_none() {
            cluster.create_time = now;
        }
        cluster
    }
}

impl fmt::Debug for ClusterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterRequest")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("labels", &self.labels)
            .field("kube_config", &self.kube_config.as_ref().map(|_| "<redacted>"))
            .field("kube_config_secret", &self.kube_config_secret)
            .field("dashboard_url", &self.dashboard_url)
            .finish_non_exhaustive()
    }
}

/// A cluster discovered through a cloud provider account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudCluster {
    /// Provider kind, e.g. `aliyun` or `aws`.
    pub provider: String,
    /// Cluster ID at the provider.
    pub id: String,
    /// Cluster name at the provider.
    pub name: String,
    /// Availability zone.
    #[serde(default)]
    pub zone: String,
    /// Availability zone ID.
    #[serde(default)]
    pub zone_id: String,
    /// Region ID.
    #[serde(default)]
    pub region_id: String,
    /// VPC ID.
    #[serde(default)]
    pub vpc_id: String,
    /// Provider-side labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Provider console URL for the cluster.
    #[serde(default)]
    pub dashboard_url: String,
}

impl CloudCluster {
    /// Provider metadata to embed in the registry record.
    #[must_use]
    pub fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            provider: self.provider.clone(),
            cluster_name: self.name.clone(),
            cluster_id: self.id.clone(),
            zone: self.zone.clone(),
            zone_id: self.zone_id.clone(),
            region_id: self.region_id.clone(),
            vpc_id: self.vpc_id.clone(),
            labels: self.labels.clone(),
        }
    }
}

/// Public view of a cluster, without credential fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterBase {
    /// Cluster name.
    pub name: ClusterName,
    /// Display name.
    pub alias: String,
    /// Free-form description.
    pub description: String,
    /// Icon URL.
    pub icon: String,
    /// Organizational labels.
    pub labels: BTreeMap<String, String>,
    /// Cloud provider metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderInfo>,
    /// API server endpoint.
    pub api_server_url: String,
    /// Dashboard endpoint.
    pub dashboard_url: String,
    /// Last observed status.
    pub status: ClusterStatus,
    /// Why the cluster is unhealthy; empty when healthy.
    pub reason: String,
    /// Creation timestamp.
    pub create_time: DateTime<Utc>,
    /// Last modification timestamp.
    pub update_time: DateTime<Utc>,
}

impl From<&Cluster> for ClusterBase {
    fn from(cluster: &Cluster) -> Self {
        Self {
            name: cluster.name.clone(),
            alias: cluster.alias.clone(),
            description: cluster.description.clone(),
            icon: cluster.icon.clone(),
            labels: cluster.labels.clone(),
            provider: cluster.provider.clone(),
            api_server_url: cluster.api_server_url.clone(),
            dashboard_url: cluster.dashboard_url.clone(),
            status: cluster.status(),
            reason: cluster.reason().to_string(),
            create_time: cluster.create_time,
            update_time: cluster.update_time,
        }
    }
}

impl From<Cluster> for ClusterBase {
    fn from(cluster: Cluster) -> Self {
        Self::from(&cluster)
    }
}

/// Resource usage derived from a cluster's node facts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Worker node count.
    pub worker_number: u32,
    /// Control-plane node count.
    pub master_number: u32,
    /// Total memory in bytes.
    pub memory_capacity: i64,
    /// Total CPU in cores.
    pub cpu_capacity: i64,
    /// Total GPUs. Always zero.
    pub gpu_capacity: i64,
    /// Total pod slots.
    pub pod_capacity: i64,
    /// Memory reserved away from workloads.
    pub memory_used: i64,
    /// CPU reserved away from workloads.
    pub cpu_used: i64,
    /// GPUs in use. Always zero.
    pub gpu_used: i64,
    /// Pod slots reserved away from workloads.
    pub pod_used: i64,
    /// Storage class names.
    pub storage_class_list: Vec<String>,
}

impl From<&ClusterInfo> for ResourceInfo {
    fn from(info: &ClusterInfo) -> Self {
        Self {
            worker_number: info.worker_number,
            master_number: info.master_number,
            memory_capacity: info.memory_capacity,
            cpu_capacity: info.cpu_capacity,
            gpu_capacity: 0,
            pod_capacity: info.pod_capacity,
            memory_used: info.memory_capacity - info.memory_allocatable,
            cpu_used: info.cpu_capacity - info.cpu_allocatable,
            gpu_used: 0,
            pod_used: info.pod_capacity - info.pod_allocatable,
            storage_class_list: info.storage_classes.clone(),
        }
    }
}

/// A cluster with its current resource snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDetail {
    /// The cluster.
    #[serde(flatten)]
    pub cluster: ClusterBase,
    /// Resource snapshot; zeroed when the probe failed.
    pub resource_info: ResourceInfo,
}

/// Query parameters for listing clusters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterQuery {
    /// Substring the cluster name must contain.
    #[serde(default)]
    pub query: String,
    /// 1-based page number; zero disables pagination.
    #[serde(default)]
    pub page: usize,
    /// Page size; zero disables pagination.
    #[serde(default)]
    pub page_size: usize,
}

/// A page of clusters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterList {
    /// Clusters on this page.
    pub clusters: Vec<ClusterBase>,
    /// Number of clusters matching the query across all pages.
    pub total: u64,
}

/// Request to create a namespace in a member cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNamespaceRequest {
    /// Namespace name.
    pub namespace: String,
}

/// Result of a namespace creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNamespaceResponse {
    /// True if the namespace was already present.
    pub exists: bool,
}

/// Configuration for the cluster lifecycle service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Address the HTTP server binds to.
    pub listen_addr: String,
    /// `RocksDB` data directory.
    pub data_dir: String,
    /// How long a resource snapshot stays fresh (seconds).
    pub resource_info_ttl_seconds: u64,
    /// Upper bound for any single control plane call (seconds).
    pub gateway_timeout_seconds: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            data_dir: "/data".to_string(),
            resource_info_ttl_seconds: 60,
            gateway_timeout_seconds: 30,
        }
    }
}

impl ControlConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `LISTEN_ADDR`: HTTP listen address
    /// - `DATA_DIR`: `RocksDB` data directory
    /// - `RESOURCE_INFO_TTL_SECONDS`: Resource snapshot TTL
    /// - `GATEWAY_TIMEOUT_SECONDS`: Control plane call timeout
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Ok(val) = std::env::var("DATA_DIR") {
            config.data_dir = val;
        }
        if let Ok(val) = std::env::var("RESOURCE_INFO_TTL_SECONDS") {
            if let Ok(n) = val.parse() {
                config.resource_info_ttl_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("GATEWAY_TIMEOUT_SECONDS") {
            if let Ok(n) = val.parse() {
                config.gateway_timeout_seconds = n;
            }
        }

        config
    }

    /// Resource snapshot TTL.
    #[must_use]
    pub const fn resource_info_ttl(&self) -> Duration {
        Duration::from_secs(self.resource_info_ttl_seconds)
    }

    /// Bound for each control plane call.
    #[must_use]
    pub const fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubfleet_store::ClusterHealth;

    fn test_name(name: &str) -> ClusterName {
        ClusterName::new(name).unwrap()
    }

    #[test]
    fn request_builds_new_cluster() {
        let mut request = ClusterRequest::new(test_name("east-1"), "apiVersion: v1");
        request.alias = "East".to_string();
        request.kube_config_secret = Some("   ".to_string());

        let cluster = request.into_cluster(None);
        assert_eq!(cluster.name.as_str(), "east-1");
        assert_eq!(cluster.alias, "East");
        assert_eq!(cluster.kube_config.as_deref(), Some("apiVersion: v1"));
        assert!(cluster.kube_config_secret.is_none());
        assert_eq!(cluster.create_time, cluster.update_time);
    }

    #[test]
    fn request_preserves_base_fields() {
        let mut base = ClusterRequest::new(test_name("east-1"), "a").into_cluster(None);
        base.api_server_url = "https://10.0.0.1:6443".to_string();
        base.health = ClusterHealth::unhealthy("down");
        base.provider = Some(ProviderInfo::default());

        let mut request = ClusterRequest::new(test_name("east-1"), "a");
        request.description = "updated".to_string();
        let updated = request.into_cluster(Some(&base));

        assert_eq!(updated.description, "updated");
        assert_eq!(updated.api_server_url, base.api_server_url);
        assert_eq!(updated.create_time, base.create_time);
        assert_eq!(updated.health, base.health);
        assert!(updated.provider.is_some());
        assert!(!updated.credentials_differ(&base));
    }

    #[test]
    fn request_debug_redacts_kubeconfig() {
        let request = ClusterRequest::new(test_name("east-1"), "token: hunter2");
        assert!(!format!("{request:?}").contains("hunter2"));
    }

    #[test]
    fn resource_info_from_cluster_info() {
        let info = ClusterInfo {
            worker_number: 2,
            master_number: 1,
            memory_capacity: 100,
            memory_allocatable: 80,
            cpu_capacity: 8,
            cpu_allocatable: 6,
            pod_capacity: 220,
            pod_allocatable: 200,
            storage_classes: vec!["standard".to_string()],
        };
        let resources = ResourceInfo::from(&info);

        assert_eq!(resources.memory_used, 20);
        assert_eq!(resources.cpu_used, 2);
        assert_eq!(resources.pod_used, 20);
        assert_eq!(resources.gpu_capacity, 0);
        assert_eq!(resources.gpu_used, 0);
        assert_eq!(resources.storage_class_list, ["standard"]);
    }

    #[test]
    fn cluster_base_hides_credentials() {
        let cluster = ClusterRequest::new(test_name("east-1"), "token: hunter2").into_cluster(None);
        let json = serde_json::to_string(&ClusterBase::from(&cluster)).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"status\":\"Healthy\""));
    }

    #[test]
    fn control_config_defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.resource_info_ttl(), Duration::from_secs(60));
        assert_eq!(config.gateway_timeout(), Duration::from_secs(30));
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
    }
}
