//! Control plane membership gateway.
//!
//! This module provides the `KubeGateway`, which records each member cluster
//! as a credential secret on the hub and talks to members through clients
//! built from those credentials.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Secret};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info, warn};

use hubfleet_core::ClusterName;

use crate::credential::Credential;
use crate::quantity::{parse_quantity, round_up};
use crate::secret::{build_membership_secret, kubeconfig_from_secret, renamed_secret};
use crate::types::{ClusterInfo, MembershipConfig, NamespaceOutcome};
use crate::{GatewayError, Result};

/// Node labels that mark a control-plane node.
const MASTER_ROLE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

/// The `ControlPlaneGateway` trait defines the interface for cluster membership.
#[async_trait]
pub trait ControlPlaneGateway: Send + Sync {
    /// Register a cluster under `name` using the given credential.
    ///
    /// Returns the API server endpoint observed while joining.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::AlreadyJoined` if a membership named `name`
    /// already exists, or another error if the cluster cannot be reached.
    async fn join(&self, name: &ClusterName, credential: &Credential) -> Result<String>;

    /// Remove the membership for `name`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotJoined` if there is no such membership.
    async fn detach(&self, name: &ClusterName) -> Result<()>;

    /// Move a membership from `old` to `new`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotJoined` if `old` is not a member and
    /// `GatewayError::AlreadyJoined` if `new` already is.
    async fn rename(&self, old: &ClusterName, new: &ClusterName) -> Result<()>;

    /// Fetch node and storage facts from a member cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the member cannot be queried.
    async fn cluster_info(&self, name: &ClusterName) -> Result<ClusterInfo>;

    /// Create a namespace in a member cluster.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NoPermission` if the member refuses the request.
    async fn create_namespace(&self, name: &ClusterName, namespace: &str)
        -> Result<NamespaceOutcome>;

    /// The API server endpoint of the hub itself.
    fn hub_endpoint(&self) -> String;
}

/// Kubernetes-based membership gateway.
///
/// Memberships are secrets in the configured credential namespace of the hub.
/// The reserved `local` cluster is served by the hub's own client.
pub struct KubeGateway {
    client: Client,
    config: MembershipConfig,
    hub_endpoint: String,
}

impl KubeGateway {
    /// Create a new gateway.
    ///
    /// This will attempt to connect to the hub using in-cluster config
    /// or the local kubeconfig file.
    ///
    /// # Errors
    ///
    /// Returns an error if the Kubernetes client cannot be created.
    pub async fn new(config: MembershipConfig) -> Result<Self> {
        let kube_config = Config::infer()
            .await
            .map_err(|e| GatewayError::Upstream(format!("Failed to infer hub config: {e}")))?;
        let hub_endpoint = normalize_endpoint(&kube_config.cluster_url.to_string());
        let client = Client::try_from(kube_config)?;

        info!(
            hub_endpoint,
            namespace = %config.credential_namespace,
            "Connected to hub cluster"
        );

        Ok(Self {
            client,
            config,
            hub_endpoint,
        })
    }

    /// Create a new gateway with a pre-configured hub client.
    #[must_use]
    pub fn with_client(client: Client, config: MembershipConfig, hub_endpoint: String) -> Self {
        Self {
            client,
            config,
            hub_endpoint,
        }
    }

    /// Get a reference to the gateway config.
    #[must_use]
    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    /// Get the secrets API client for the credential namespace.
    fn secrets_api(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.config.credential_namespace)
    }

    /// Build a client for a member from its stored credential.
    async fn member_client(&self, name: &ClusterName) -> Result<Client> {
        if name.is_local() {
            return Ok(self.client.clone());
        }

        let secret = self
            .secrets_api()
            .get_opt(name.as_str())
            .await?
            .ok_or_else(|| GatewayError::NotJoined(name.to_string()))?;
        let kubeconfig = kubeconfig_from_secret(&secret).ok_or_else(|| {
            GatewayError::InvalidCredential(format!("membership secret for {name} has no kubeconfig"))
        })?;

        let (client, _) = connect(&Credential::from_kubeconfig(kubeconfig)).await?;
        Ok(client)
    }
}

/// Build a client from a credential, returning it with the API server endpoint.
///
/// The credential is staged on disk only while the kubeconfig is loaded.
async fn connect(credential: &Credential) -> Result<(Client, String)> {
    let kubeconfig = {
        let staged = credential.stage()?;
        Kubeconfig::read_from(staged.path())
            .map_err(|e| GatewayError::InvalidCredential(e.to_string()))?
    };

    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| GatewayError::InvalidCredential(e.to_string()))?;
    let endpoint = normalize_endpoint(&config.cluster_url.to_string());
    let client = Client::try_from(config)?;

    Ok((client, endpoint))
}

fn normalize_endpoint(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn is_master(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .is_some_and(|labels| MASTER_ROLE_LABELS.iter().any(|l| labels.contains_key(*l)))
}

/// Running sums of node resources in base units.
#[derive(Default)]
struct Totals {
    memory: f64,
    cpu: f64,
    pods: f64,
}

impl Totals {
    fn add(&mut self, resources: Option<&BTreeMap<String, Quantity>>) {
        let Some(resources) = resources else {
            return;
        };
        let value = |key: &str| {
            resources
                .get(key)
                .and_then(|q| parse_quantity(&q.0))
                .unwrap_or_default()
        };
        self.memory += value("memory");
        self.cpu += value("cpu");
        self.pods += value("pods");
    }
}

/// Sum node capacity and allocatable figures into a `ClusterInfo`.
fn summarize_nodes(nodes: &[Node]) -> ClusterInfo {
    let mut info = ClusterInfo::default();
    let mut capacity = Totals::default();
    let mut allocatable = Totals::default();

    for node in nodes {
        if is_master(node) {
            info.master_number += 1;
        } else {
            info.worker_number += 1;
        }

        let status = node.status.as_ref();
        capacity.add(status.and_then(|s| s.capacity.as_ref()));
        allocatable.add(status.and_then(|s| s.allocatable.as_ref()));
    }

    info.memory_capacity = round_up(capacity.memory);
    info.memory_allocatable = round_up(allocatable.memory);
    info.cpu_capacity = round_up(capacity.cpu);
    info.cpu_allocatable = round_up(allocatable.cpu);
    info.pod_capacity = round_up(capacity.pods);
    info.pod_allocatable = round_up(allocatable.pods);
    info
}

#[async_trait]
impl ControlPlaneGateway for KubeGateway {
    async fn join(&self, name: &ClusterName, credential: &Credential) -> Result<String> {
        let secrets = self.secrets_api();

        if secrets.get_opt(name.as_str()).await?.is_some() {
            return Err(GatewayError::AlreadyJoined(name.to_string()));
        }

        let (client, endpoint) = connect(credential).await?;
        let version = client
            .apiserver_version()
            .await
            .map_err(|e| GatewayError::Unreachable(format!("{endpoint}: {e}")))?;

        let secret = build_membership_secret(name, &endpoint, credential.expose(), &self.config);
        match secrets.create(&PostParams::default(), &secret).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 409 => {
                return Err(GatewayError::AlreadyJoined(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            cluster = %name,
            endpoint,
            version = %version.git_version,
            "Joined cluster"
        );

        Ok(endpoint)
    }

    async fn detach(&self, name: &ClusterName) -> Result<()> {
        match self
            .secrets_api()
            .delete(name.as_str(), &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!(cluster = %name, "Detached cluster");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                Err(GatewayError::NotJoined(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn rename(&self, old: &ClusterName, new: &ClusterName) -> Result<()> {
        let secrets = self.secrets_api();

        let existing = secrets
            .get_opt(old.as_str())
            .await?
            .ok_or_else(|| GatewayError::NotJoined(old.to_string()))?;

        let copy = renamed_secret(&existing, new, &self.config);
        match secrets.create(&PostParams::default(), &copy).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 409 => {
                return Err(GatewayError::AlreadyJoined(new.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = secrets.delete(old.as_str(), &DeleteParams::default()).await {
            warn!(old = %old, new = %new, error = %e, "Failed to remove old membership, reverting rename");
            if let Err(revert) = secrets.delete(new.as_str(), &DeleteParams::default()).await {
                warn!(cluster = %new, error = %revert, "Failed to revert renamed membership");
            }
            return Err(e.into());
        }

        info!(old = %old, new = %new, "Renamed cluster membership");
        Ok(())
    }

    async fn cluster_info(&self, name: &ClusterName) -> Result<ClusterInfo> {
        let client = self.member_client(name).await?;

        let nodes = Api::<Node>::all(client.clone())
            .list(&ListParams::default())
            .await
            .map_err(|e| GatewayError::Unreachable(format!("{name}: {e}")))?;
        let mut info = summarize_nodes(&nodes.items);

        let classes = Api::<StorageClass>::all(client)
            .list(&ListParams::default())
            .await?;
        info.storage_classes = classes
            .items
            .into_iter()
            .filter_map(|sc| sc.metadata.name)
            .collect();

        debug!(
            cluster = %name,
            workers = info.worker_number,
            masters = info.master_number,
            "Fetched cluster info"
        );

        Ok(info)
    }

    async fn create_namespace(
        &self,
        name: &ClusterName,
        namespace: &str,
    ) -> Result<NamespaceOutcome> {
        let client = self.member_client(name).await?;
        let namespaces: Api<Namespace> = Api::all(client);

        let object = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        match namespaces.create(&PostParams::default(), &object).await {
            Ok(_) => {
                info!(cluster = %name, namespace, "Created namespace");
                Ok(NamespaceOutcome::Created)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(cluster = %name, namespace, "Namespace already exists");
                Ok(NamespaceOutcome::AlreadyExists)
            }
            Err(kube::Error::Api(e)) if e.code == 403 => Err(GatewayError::NoPermission(
                format!("{name}: {}", e.message),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn hub_endpoint(&self) -> String {
        self.hub_endpoint.clone()
    }
}

/// A mock gateway for testing without real clusters.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    /// Endpoint reported by the mock hub.
    pub const MOCK_HUB_ENDPOINT: &str = "https://hub.mock:6443";

    /// Endpoint used when a credential carries no `server:` line.
    pub const MOCK_DEFAULT_ENDPOINT: &str = "https://member.mock:6443";

    /// Gateway operations that can be targeted by fault injection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum GatewayOp {
        /// `join`
        Join,
        /// `detach`
        Detach,
        /// `rename`
        Rename,
        /// `cluster_info`
        ClusterInfo,
        /// `create_namespace`
        CreateNamespace,
    }

    #[derive(Debug, Clone, Copy)]
    enum Fault {
        Once,
        Always,
    }

    struct MockMember {
        credential: Credential,
        endpoint: String,
    }

    #[derive(Default)]
    struct MockState {
        members: HashMap<ClusterName, MockMember>,
        namespaces: HashMap<ClusterName, HashSet<String>>,
        faults: HashMap<GatewayOp, Fault>,
        calls: HashMap<GatewayOp, usize>,
        unreachable: HashSet<ClusterName>,
        forbidden: HashSet<ClusterName>,
        info: ClusterInfo,
        latency: Option<Duration>,
        delays: HashMap<GatewayOp, Duration>,
    }

    /// A mock gateway that keeps memberships in memory.
    #[derive(Default)]
    pub struct MockGateway {
        state: Mutex<MockState>,
    }

    impl MockGateway {
        /// Create a new mock gateway reporting a small default cluster.
        #[must_use]
        pub fn new() -> Self {
            let gateway = Self::default();
            gateway.set_cluster_info(default_info());
            gateway
        }

        /// Fail the next call of `op`.
        pub fn fail_once(&self, op: GatewayOp) {
            self.state.lock().faults.insert(op, Fault::Once);
        }

        /// Fail every call of `op` until cleared.
        pub fn fail_always(&self, op: GatewayOp) {
            self.state.lock().faults.insert(op, Fault::Always);
        }

        /// Remove all injected faults.
        pub fn clear_faults(&self) {
            self.state.lock().faults.clear();
        }

        /// Make `cluster_info` fail for one cluster.
        pub fn set_unreachable(&self, name: &ClusterName, unreachable: bool) {
            let mut state = self.state.lock();
            if unreachable {
                state.unreachable.insert(name.clone());
            } else {
                state.unreachable.remove(name);
            }
        }

        /// Make namespace creation forbidden on one cluster.
        pub fn forbid_namespaces(&self, name: &ClusterName) {
            self.state.lock().forbidden.insert(name.clone());
        }

        /// Delay every operation by `latency`.
        pub fn set_latency(&self, latency: Duration) {
            self.state.lock().latency = Some(latency);
        }

        /// Delay every call of `op` by `delay`, instead of the global latency.
        pub fn set_delay(&self, op: GatewayOp, delay: Duration) {
            self.state.lock().delays.insert(op, delay);
        }

        /// Set the facts reported by `cluster_info`.
        pub fn set_cluster_info(&self, info: ClusterInfo) {
            self.state.lock().info = info;
        }

        /// Register a membership directly, bypassing `join`.
        pub fn insert_member(&self, name: &ClusterName, credential: &Credential) {
            self.state.lock().members.insert(
                name.clone(),
                MockMember {
                    credential: credential.clone(),
                    endpoint: endpoint_for(credential),
                },
            );
        }

        /// Check if a membership exists.
        #[must_use]
        pub fn is_member(&self, name: &ClusterName) -> bool {
            self.state.lock().members.contains_key(name)
        }

        /// All membership names, sorted.
        #[must_use]
        pub fn members(&self) -> Vec<ClusterName> {
            let mut names: Vec<_> = self.state.lock().members.keys().cloned().collect();
            names.sort();
            names
        }

        /// The credential a member joined with.
        #[must_use]
        pub fn credential_of(&self, name: &ClusterName) -> Option<Credential> {
            self.state
                .lock()
                .members
                .get(name)
                .map(|m| m.credential.clone())
        }

        /// The endpoint recorded for a member.
        #[must_use]
        pub fn endpoint_of(&self, name: &ClusterName) -> Option<String> {
            self.state
                .lock()
                .members
                .get(name)
                .map(|m| m.endpoint.clone())
        }

        /// Check if a namespace was created on a cluster.
        #[must_use]
        pub fn has_namespace(&self, name: &ClusterName, namespace: &str) -> bool {
            self.state
                .lock()
                .namespaces
                .get(name)
                .is_some_and(|set| set.contains(namespace))
        }

        /// Number of times `op` was invoked.
        #[must_use]
        pub fn call_count(&self, op: GatewayOp) -> usize {
            self.state.lock().calls.get(&op).copied().unwrap_or(0)
        }

        /// Record the call, apply latency, and consume an injected fault.
        async fn enter(&self, op: GatewayOp) -> Result<()> {
            let latency = {
                let mut state = self.state.lock();
                *state.calls.entry(op).or_default() += 1;
                state.delays.get(&op).copied().or(state.latency)
            };
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let mut state = self.state.lock();
            match state.faults.get(&op).copied() {
                Some(Fault::Once) => {
                    state.faults.remove(&op);
                    Err(GatewayError::Upstream(format!("injected {op:?} failure")))
                }
                Some(Fault::Always) => {
                    Err(GatewayError::Upstream(format!("injected {op:?} failure")))
                }
                None => Ok(()),
            }
        }
    }

    fn default_info() -> ClusterInfo {
        ClusterInfo {
            worker_number: 3,
            master_number: 1,
            memory_capacity: 32 * 1024 * 1024 * 1024,
            memory_allocatable: 24 * 1024 * 1024 * 1024,
            cpu_capacity: 16,
            cpu_allocatable: 12,
            pod_capacity: 440,
            pod_allocatable: 400,
            storage_classes: vec!["standard".to_string()],
        }
    }

    /// Derive the endpoint from the credential's `server:` line.
    fn endpoint_for(credential: &Credential) -> String {
        credential
            .expose()
            .lines()
            .find_map(|line| line.trim().strip_prefix("server:"))
            .map_or_else(|| MOCK_DEFAULT_ENDPOINT.to_string(), |s| s.trim().to_string())
    }

    #[async_trait]
    impl ControlPlaneGateway for MockGateway {
        async fn join(&self, name: &ClusterName, credential: &Credential) -> Result<String> {
            self.enter(GatewayOp::Join).await?;

            if credential.is_blank() {
                return Err(GatewayError::InvalidCredential("empty kubeconfig".to_string()));
            }

            let mut state = self.state.lock();
            if state.members.contains_key(name) {
                return Err(GatewayError::AlreadyJoined(name.to_string()));
            }

            let endpoint = endpoint_for(credential);
            state.members.insert(
                name.clone(),
                MockMember {
                    credential: credential.clone(),
                    endpoint: endpoint.clone(),
                },
            );
            Ok(endpoint)
        }

        async fn detach(&self, name: &ClusterName) -> Result<()> {
            self.enter(GatewayOp::Detach).await?;

            let mut state = self.state.lock();
            if state.members.remove(name).is_none() {
                return Err(GatewayError::NotJoined(name.to_string()));
            }
            state.namespaces.remove(name);
            Ok(())
        }

        async fn rename(&self, old: &ClusterName, new: &ClusterName) -> Result<()> {
            self.enter(GatewayOp::Rename).await?;

            let mut state = self.state.lock();
            if !state.members.contains_key(old) {
                return Err(GatewayError::NotJoined(old.to_string()));
            }
            if state.members.contains_key(new) {
                return Err(GatewayError::AlreadyJoined(new.to_string()));
            }

            if let Some(member) = state.members.remove(old) {
                state.members.insert(new.clone(), member);
            }
            if let Some(namespaces) = state.namespaces.remove(old) {
                state.namespaces.insert(new.clone(), namespaces);
            }
            Ok(())
        }

        async fn cluster_info(&self, name: &ClusterName) -> Result<ClusterInfo> {
            self.enter(GatewayOp::ClusterInfo).await?;

            let state = self.state.lock();
            if state.unreachable.contains(name) {
                return Err(GatewayError::Unreachable(format!("{name}: connection refused")));
            }
            if !name.is_local() && !state.members.contains_key(name) {
                return Err(GatewayError::NotJoined(name.to_string()));
            }
            Ok(state.info.clone())
        }

        async fn create_namespace(
            &self,
            name: &ClusterName,
            namespace: &str,
        ) -> Result<NamespaceOutcome> {
            self.enter(GatewayOp::CreateNamespace).await?;

            let mut state = self.state.lock();
            if !name.is_local() && !state.members.contains_key(name) {
                return Err(GatewayError::NotJoined(name.to_string()));
            }
            if state.forbidden.contains(name) {
                return Err(GatewayError::NoPermission(format!(
                    "namespaces is forbidden on {name}"
                )));
            }

            let created = state
                .namespaces
                .entry(name.clone())
                .or_default()
                .insert(namespace.to_string());
            Ok(if created {
                NamespaceOutcome::Created
            } else {
                NamespaceOutcome::AlreadyExists
            })
        }

        fn hub_endpoint(&self) -> String {
            MOCK_HUB_ENDPOINT.to_string()
        }
    }
}
