//! Types for the membership crate.

use serde::{Deserialize, Serialize};

/// Raw node and storage facts reported by a member cluster.
///
/// Quantities are in base units: bytes for memory, cores for CPU and a plain
/// count for pods. Fractional values are rounded up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Nodes without a control-plane role.
    pub worker_number: u32,
    /// Nodes carrying a control-plane role.
    pub master_number: u32,
    /// Total memory capacity.
    pub memory_capacity: i64,
    /// Memory allocatable to workloads.
    pub memory_allocatable: i64,
    /// Total CPU capacity.
    pub cpu_capacity: i64,
    /// CPU allocatable to workloads.
    pub cpu_allocatable: i64,
    /// Total pod capacity.
    pub pod_capacity: i64,
    /// Pods allocatable to workloads.
    pub pod_allocatable: i64,
    /// Names of the storage classes defined in the cluster.
    pub storage_classes: Vec<String>,
}

/// Result of a namespace creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceOutcome {
    /// The namespace was created.
    Created,
    /// The namespace was already present.
    AlreadyExists,
}

impl NamespaceOutcome {
    /// Returns true if the namespace existed before the request.
    #[must_use]
    pub const fn existed(self) -> bool {
        matches!(self, Self::AlreadyExists)
    }
}

/// Configuration for the Kubernetes membership gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// Namespace on the hub holding one credential secret per member.
    pub credential_namespace: String,
    /// Label set to `"true"` on secrets managed by this gateway.
    pub managed_label: String,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            credential_namespace: "hubfleet-system".to_string(),
            managed_label: "hubfleet.io/member-cluster".to_string(),
        }
    }
}

impl MembershipConfig {
    /// Create a new membership config with the given credential namespace.
    #[must_use]
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            credential_namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `MEMBERSHIP_NAMESPACE`: Namespace holding member credential secrets
    /// - `MEMBERSHIP_LABEL`: Label key marking managed secrets
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MEMBERSHIP_NAMESPACE") {
            config.credential_namespace = val;
        }
        if let Ok(val) = std::env::var("MEMBERSHIP_LABEL") {
            config.managed_label = val;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_config_defaults() {
        let config = MembershipConfig::default();
        assert_eq!(config.credential_namespace, "hubfleet-system");
        assert_eq!(config.managed_label, "hubfleet.io/member-cluster");

        let custom = MembershipConfig::with_namespace("fleet");
        assert_eq!(custom.credential_namespace, "fleet");
    }

    #[test]
    fn namespace_outcome_existed() {
        assert!(NamespaceOutcome::AlreadyExists.existed());
        assert!(!NamespaceOutcome::Created.existed());
    }
}
