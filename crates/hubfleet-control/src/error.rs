//! Error types for the cluster lifecycle service.
//!
//! This module defines all errors that can occur while creating, modifying,
//! deleting or inspecting member clusters.

use std::time::Duration;

use hubfleet_core::{ClusterName, IdError};
use hubfleet_membership::GatewayError;
use hubfleet_store::StoreError;
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in cluster lifecycle operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The reserved hub cluster name was requested for a new cluster.
    #[error("cluster name \"local\" is reserved for the hub cluster")]
    LocalClusterReserved,

    /// The hub cluster cannot be modified or deleted.
    #[error("the hub cluster cannot be modified or deleted")]
    LocalClusterImmutable,

    /// A registry record already exists for the name.
    #[error("cluster {0} already exists in the registry")]
    ClusterExistsInRegistry(ClusterName),

    /// The control plane already has a membership under the name.
    #[error("cluster {0} already exists in the control plane")]
    ClusterExistsInControlPlane(ClusterName),

    /// No registry record exists for the name.
    #[error("cluster not found: {0}")]
    ClusterNotFound(ClusterName),

    /// Only a credential reference was supplied.
    #[error("kubeconfig secret references are not supported, supply the kubeconfig itself")]
    KubeConfigSecretUnsupported,

    /// Neither a credential nor a reference was supplied.
    #[error("a kubeconfig is required")]
    KubeConfigMissing,

    /// The member cluster refused to create the namespace.
    #[error("no permission to create namespace {namespace} in cluster {cluster}")]
    NamespaceNoPermission {
        /// The target cluster.
        cluster: ClusterName,
        /// The namespace that was requested.
        namespace: String,
    },

    /// The cluster's API server could not be probed.
    #[error("failed to probe cluster {cluster}: {reason}")]
    ProbeFailed {
        /// The cluster that was probed.
        cluster: ClusterName,
        /// Why the probe failed.
        reason: String,
    },

    /// A cluster name failed validation.
    #[error("invalid cluster name: {0}")]
    InvalidName(#[from] IdError),

    /// A request field failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A control plane call did not finish in time.
    #[error("{op} for cluster {cluster} timed out after {timeout:?}")]
    GatewayTimeout {
        /// The attempted operation.
        op: &'static str,
        /// The cluster involved.
        cluster: ClusterName,
        /// The configured bound.
        timeout: Duration,
    },

    /// A control plane call failed.
    #[error("{op} for cluster {cluster} failed: {source}")]
    Gateway {
        /// The attempted operation.
        op: &'static str,
        /// The cluster involved.
        cluster: ClusterName,
        /// The underlying failure.
        #[source]
        source: GatewayError,
    },

    /// A registry call failed.
    #[error("{op} for cluster {cluster} failed: {source}")]
    Registry {
        /// The attempted operation.
        op: &'static str,
        /// The cluster involved.
        cluster: ClusterName,
        /// The underlying failure.
        #[source]
        source: StoreError,
    },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The caller went away while a multi-step operation was running; the
    /// steps already taken were undone.
    #[error("{op} cancelled after step {step}")]
    Cancelled {
        /// The operation that was cancelled.
        op: &'static str,
        /// The last step that committed before unwinding.
        step: &'static str,
    },

    /// A background operation task failed to complete.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Wrap a gateway failure, promoting the kinds callers act on.
    #[must_use]
    pub fn gateway(op: &'static str, cluster: &ClusterName, source: GatewayError) -> Self {
        match source {
            GatewayError::AlreadyJoined(_) => Self::ClusterExistsInControlPlane(cluster.clone()),
            GatewayError::Unreachable(reason) => Self::ProbeFailed {
                cluster: cluster.clone(),
                reason,
            },
            source => Self::Gateway {
                op,
                cluster: cluster.clone(),
                source,
            },
        }
    }

    /// Wrap a registry failure, promoting the kinds callers act on.
    #[must_use]
    pub fn registry(op: &'static str, cluster: &ClusterName, source: StoreError) -> Self {
        match source {
            StoreError::AlreadyExists => Self::ClusterExistsInRegistry(cluster.clone()),
            StoreError::NotFound => Self::ClusterNotFound(cluster.clone()),
            source => Self::Registry {
                op,
                cluster: cluster.clone(),
                source,
            },
        }
    }

    /// Returns true if the control plane reported no membership for the cluster.
    #[must_use]
    pub const fn is_not_joined(&self) -> bool {
        matches!(
            self,
            Self::Gateway {
                source: GatewayError::NotJoined(_),
                ..
            }
        )
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::LocalClusterReserved
            | Self::LocalClusterImmutable
            | Self::KubeConfigSecretUnsupported
            | Self::KubeConfigMissing
            | Self::InvalidName(_)
            | Self::InvalidRequest(_) => 400,
            Self::NamespaceNoPermission { .. } => 403,
            Self::ClusterNotFound(_) => 404,
            Self::ClusterExistsInRegistry(_) | Self::ClusterExistsInControlPlane(_) => 409,
            Self::Registry { .. } | Self::Store(_) | Self::Internal(_) => 500,
            Self::Cancelled { .. } => 499,
            Self::ProbeFailed { .. } => 502,
            Self::Gateway { source, .. } => source.http_status_code(),
            Self::GatewayTimeout { .. } => 504,
        }
    }

    /// Returns a stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::LocalClusterReserved => "local_cluster_reserved",
            Self::LocalClusterImmutable => "local_cluster_immutable",
            Self::ClusterExistsInRegistry(_) => "cluster_exists_in_registry",
            Self::ClusterExistsInControlPlane(_) => "cluster_exists_in_control_plane",
            Self::ClusterNotFound(_) => "cluster_not_found",
            Self::KubeConfigSecretUnsupported => "kubeconfig_secret_unsupported",
            Self::KubeConfigMissing => "kubeconfig_missing",
            Self::NamespaceNoPermission { .. } => "namespace_no_permission",
            Self::ProbeFailed { .. } => "probe_failed",
            Self::InvalidName(_) => "invalid_name",
            Self::InvalidRequest(_) => "invalid_request",
            Self::GatewayTimeout { .. } => "gateway_timeout",
            Self::Gateway { .. } => "gateway_error",
            Self::Registry { .. } | Self::Store(_) => "storage_error",
            Self::Cancelled { .. } => "cancelled",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::GatewayTimeout { .. } | Self::ProbeFailed { .. } | Self::Cancelled { .. } => true,
            Self::Gateway { source, .. } => source.is_retriable(),
            Self::Registry { source, .. } | Self::Store(source) => {
                matches!(source, StoreError::Database(_))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name() -> ClusterName {
        ClusterName::new("east-1").unwrap()
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(ControlError::LocalClusterReserved.http_status_code(), 400);
        assert_eq!(ControlError::KubeConfigMissing.http_status_code(), 400);
        assert_eq!(
            ControlError::ClusterNotFound(test_name()).http_status_code(),
            404
        );
        assert_eq!(
            ControlError::ClusterExistsInRegistry(test_name()).http_status_code(),
            409
        );
        assert_eq!(
            ControlError::NamespaceNoPermission {
                cluster: test_name(),
                namespace: "team-a".to_string(),
            }
            .http_status_code(),
            403
        );
        assert_eq!(
            ControlError::GatewayTimeout {
                op: "join",
                cluster: test_name(),
                timeout: Duration::from_secs(1),
            }
            .http_status_code(),
            504
        );

        let cancelled = ControlError::Cancelled {
            op: "identity_migration",
            step: "detach_old",
        };
        assert_eq!(cancelled.http_status_code(), 499);
        assert_eq!(cancelled.code(), "cancelled");
        assert!(cancelled.is_retriable());
    }

    #[test]
    fn gateway_errors_are_classified() {
        let name = test_name();

        let exists = ControlError::gateway("join", &name, GatewayError::AlreadyJoined("x".into()));
        assert!(matches!(exists, ControlError::ClusterExistsInControlPlane(_)));
        assert_eq!(exists.code(), "cluster_exists_in_control_plane");

        let probe = ControlError::gateway("join", &name, GatewayError::Unreachable("refused".into()));
        assert!(matches!(probe, ControlError::ProbeFailed { .. }));
        assert!(probe.is_retriable());

        let detached = ControlError::gateway("detach", &name, GatewayError::NotJoined("x".into()));
        assert!(detached.is_not_joined());
        assert_eq!(detached.http_status_code(), 404);
        assert!(detached.to_string().contains("detach for cluster east-1"));
    }

    #[test]
    fn registry_errors_are_classified() {
        let name = test_name();
        assert!(matches!(
            ControlError::registry("add", &name, StoreError::AlreadyExists),
            ControlError::ClusterExistsInRegistry(_)
        ));
        assert!(matches!(
            ControlError::registry("delete", &name, StoreError::NotFound),
            ControlError::ClusterNotFound(_)
        ));

        let db = ControlError::registry("put", &name, StoreError::Database("io".into()));
        assert_eq!(db.code(), "storage_error");
        assert!(db.is_retriable());
    }
}
