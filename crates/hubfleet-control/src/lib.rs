//! Member cluster lifecycle management for the hubfleet hub.
//!
//! This crate keeps two systems in step: the cluster registry (durable
//! records in [`hubfleet_store`]) and the hub's control plane memberships
//! (through a [`hubfleet_membership::ControlPlaneGateway`]). Neither offers a
//! transaction spanning both, so every multi-step operation undoes its own
//! side effects on failure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP API (axum)                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ClusterLifecycleService                    │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐   │
//! │  │  Cluster    │ │  Identity   │ │   ResourceInfo      │   │
//! │  │  CRUD       │ │  Saga       │ │   Cache             │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┴─────────────┐
//!                ▼                           ▼
//!         ┌──────────────┐           ┌──────────────┐
//!         │   Registry   │           │ Control plane│
//!         │  (RocksDB)   │           │    (K8s)     │
//!         └──────────────┘           └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use hubfleet_control::{ClusterLifecycle, ClusterLifecycleService, ClusterName, CreateClusterRequest};
//! use hubfleet_membership::{KubeGateway, MembershipConfig};
//! use hubfleet_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/hubfleet")?);
//! let gateway = Arc::new(KubeGateway::new(MembershipConfig::default()).await?);
//!
//! // Registers the hub cluster as `local`
//! let lifecycle = ClusterLifecycleService::with_defaults(store, gateway)?;
//!
//! let kubeconfig = std::fs::read_to_string("east-1.kubeconfig")?;
//! let request = CreateClusterRequest::new(ClusterName::new("east-1")?, kubeconfig);
//! let cluster = lifecycle.create_cluster(request).await?;
//!
//! println!("Joined {} at {}", cluster.name, cluster.api_server_url);
//! # Ok(())
//! # }
//! ```
//!
//! # Identity changes
//!
//! Renaming a cluster or replacing its kubeconfig runs the saga in the
//! [`migration`] module. All other modifications rewrite the record in place.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod backends;
pub mod bootstrap;
pub mod cache;
pub mod error;
pub mod locks;
pub mod migration;
pub mod saga;
pub mod service;
pub mod types;

pub use cache::ResourceInfoCache;
pub use error::{ControlError, Result};
pub use locks::NameLocks;
pub use saga::{Saga, SagaFailure, SagaReport, SagaStep};
pub use service::{ClusterLifecycle, ClusterLifecycleService};
pub use types::{
    CloudCluster, ClusterBase, ClusterDetail, ClusterList, ClusterQuery, ClusterRequest,
    ControlConfig, CreateClusterRequest, CreateNamespaceRequest, CreateNamespaceResponse,
    ModifyClusterRequest, ResourceInfo,
};

// Re-export commonly used types from dependencies for convenience
pub use hubfleet_core::ClusterName;
pub use hubfleet_store::{Cluster, ClusterHealth, ClusterStatus};
