//! Membership secret builder for Kubernetes.
//!
//! Each member cluster is represented on the hub by one `Secret` in the
//! credential namespace. The secret is named after the cluster, carries the
//! kubeconfig under [`KUBECONFIG_KEY`], and records the observed API server
//! endpoint in an annotation.

use std::collections::BTreeMap;

use hubfleet_core::ClusterName;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;

use crate::MembershipConfig;

/// Data key holding the member kubeconfig.
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Annotation holding the member API server endpoint.
pub const ENDPOINT_ANNOTATION: &str = "hubfleet.io/api-server-url";

/// Annotation holding the member cluster name.
///
/// Label values are capped at 63 characters, cluster names are not.
pub const CLUSTER_NAME_ANNOTATION: &str = "hubfleet.io/cluster-name";

/// Build the membership secret for a cluster.
#[must_use]
pub fn build_membership_secret(
    name: &ClusterName,
    endpoint: &str,
    kubeconfig: &str,
    config: &MembershipConfig,
) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(
        KUBECONFIG_KEY.to_string(),
        ByteString(kubeconfig.as_bytes().to_vec()),
    );

    Secret {
        metadata: build_metadata(name, endpoint, config),
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Build a copy of an existing membership secret under a new cluster name.
///
/// Server-populated metadata is dropped so the copy can be created fresh.
#[must_use]
pub fn renamed_secret(existing: &Secret, new_name: &ClusterName, config: &MembershipConfig) -> Secret {
    let endpoint = endpoint_from_secret(existing).unwrap_or_default();

    Secret {
        metadata: build_metadata(new_name, &endpoint, config),
        data: existing.data.clone(),
        type_: existing.type_.clone(),
        ..Default::default()
    }
}

/// Read the kubeconfig stored in a membership secret.
#[must_use]
pub fn kubeconfig_from_secret(secret: &Secret) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(KUBECONFIG_KEY))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
}

/// Read the API server endpoint recorded on a membership secret.
#[must_use]
pub fn endpoint_from_secret(secret: &Secret) -> Option<String> {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ENDPOINT_ANNOTATION))
        .cloned()
}

fn build_metadata(name: &ClusterName, endpoint: &str, config: &MembershipConfig) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/managed-by".to_string(), "hubfleet".to_string());
    labels.insert(config.managed_label.clone(), "true".to_string());

    let mut annotations = BTreeMap::new();
    annotations.insert(ENDPOINT_ANNOTATION.to_string(), endpoint.to_string());
    annotations.insert(CLUSTER_NAME_ANNOTATION.to_string(), name.to_string());

    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(config.credential_namespace.clone()),
        labels: Some(labels),
        annotations: Some(annotations),
        ..Default::default()
    }
}
