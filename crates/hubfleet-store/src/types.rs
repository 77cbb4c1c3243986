//! Domain types stored in the registry.
//!
//! These types represent the persisted state of member clusters and the
//! query options used to list them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use hubfleet_core::ClusterName;
use serde::{Deserialize, Serialize};

/// A cluster record stored in the registry.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique cluster name.
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
    /// Raw kubeconfig used to join the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_config: Option<String>,
    /// Reference to an externally stored kubeconfig secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_config_secret: Option<String>,
    /// API server endpoint observed when the cluster joined.
    #[serde(default)]
    pub api_server_url: String,
    /// Dashboard endpoint.
    #[serde(default)]
    pub dashboard_url: String,
    /// Cloud provider metadata, only set for provider-created clusters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderInfo>,
    /// Last observed health.
    pub health: ClusterHealth,
    /// Creation timestamp.
    pub create_time: DateTime<Utc>,
    /// Last modification timestamp.
    pub update_time: DateTime<Utc>,
}

impl Cluster {
    /// Create an empty record for the given name, stamped with the current time.
    #[must_use]
    pub fn new(name: ClusterName) -> Self {
        let now = Utc::now();
        Self {
            name,
            alias: String::new(),
            description: String::new(),
            icon: String::new(),
            labels: BTreeMap::new(),
            kube_config: None,
            kube_config_secret: None,
            api_server_url: String::new(),
            dashboard_url: String::new(),
            provider: None,
            health: ClusterHealth::Healthy,
            create_time: now,
            update_time: now,
        }
    }

    /// The status half of the health pair.
    #[must_use]
    pub const fn status(&self) -> ClusterStatus {
        self.health.status()
    }

    /// The reason half of the health pair; empty when healthy.
    #[must_use]
    pub fn reason(&self) -> &str {
        self.health.reason()
    }

    /// Returns true if the credential inputs differ from `other`'s.
    #[must_use]
    pub fn credentials_differ(&self, other: &Self) -> bool {
        self.kube_config != other.kube_config || self.kube_config_secret != other.kube_config_secret
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("labels", &self.labels)
            .field("kube_config", &self.kube_config.as_ref().map(|_| "<redacted>"))
            .field("kube_config_secret", &self.kube_config_secret)
            .field("api_server_url", &self.api_server_url)
            .field("provider", &self.provider)
            .field("health", &self.health)
            .field("create_time", &self.create_time)
            .field("update_time", &self.update_time)
            .finish_non_exhaustive()
    }
}

/// Cloud provider metadata for a provider-created cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider kind, e.g. `aliyun` or `aws`.
    pub provider: String,
    /// Cluster name at the provider.
    pub cluster_name: String,
    /// Cluster ID at the provider.
    pub cluster_id: String,
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
}

/// Health of a cluster.
///
/// Carrying the reason inside the unhealthy variant keeps status and reason
/// consistent: a healthy cluster never has a reason and an unhealthy one
/// always does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ClusterHealth {
    /// The cluster answered the last probe.
    Healthy,
    /// The last probe failed.
    Unhealthy(String),
}

impl ClusterHealth {
    /// Build an unhealthy state; an empty reason is replaced by a placeholder.
    #[must_use]
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if reason.is_empty() {
            Self::Unhealthy("unknown error".to_string())
        } else {
            Self::Unhealthy(reason)
        }
    }

    /// The status without the reason.
    #[must_use]
    pub const fn status(&self) -> ClusterStatus {
        match self {
            Self::Healthy => ClusterStatus::Healthy,
            Self::Unhealthy(_) => ClusterStatus::Unhealthy,
        }
    }

    /// The reason; empty when healthy.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Healthy => "",
            Self::Unhealthy(reason) => reason,
        }
    }
}

/// Cluster status as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterStatus {
    /// The cluster is reachable.
    Healthy,
    /// The cluster could not be probed.
    Unhealthy,
}

/// Fixed creation time of the hub cluster record.
///
/// It predates every real cluster so the hub always lists last under the
/// default newest-first ordering.
#[must_use]
pub fn local_cluster_created_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Filter applied when listing or counting clusters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterFilter {
    /// Substring that the cluster name must contain.
    pub name_query: Option<String>,
}

impl ClusterFilter {
    /// Filter by a substring of the name; an empty query matches everything.
    #[must_use]
    pub fn by_name(query: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            name_query: (!query.is_empty()).then_some(query),
        }
    }

    /// Returns true if the cluster name passes this filter.
    #[must_use]
    pub fn matches(&self, name: &ClusterName) -> bool {
        self.name_query
            .as_deref()
            .map_or(true, |query| name.fuzzy_matches(query))
    }
}

/// Sort order for listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Newest clusters first.
    #[default]
    CreateTimeDescending,
    /// Oldest clusters first.
    CreateTimeAscending,
}

/// Options for listing clusters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Which clusters to include.
    pub filter: ClusterFilter,
    /// 1-based page number; pagination only applies when both page fields are set.
    pub page: Option<usize>,
    /// Number of clusters per page.
    pub page_size: Option<usize>,
    /// Ordering of the result.
    pub sort: SortOrder,
}

impl ListOptions {
    /// Number of matching clusters to skip and maximum to return.
    ///
    /// Pages past the addressable range skip everything.
    #[must_use]
    pub fn window(&self) -> (usize, Option<usize>) {
        match (self.page, self.page_size) {
            (Some(page), Some(size)) if page > 0 && size > 0 => {
                ((page - 1).saturating_mul(size), Some(size))
            }
            _ => (0, None),
        }
    }
}
