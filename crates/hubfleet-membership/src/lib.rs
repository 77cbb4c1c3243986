//! Control plane membership for hubfleet member clusters.
//!
//! This crate provides the [`ControlPlaneGateway`] trait and the
//! [`KubeGateway`] implementation that registers member clusters with the
//! hub. It handles:
//!
//! - Joining a cluster from its kubeconfig, detaching and renaming it
//! - Staging credentials in private temporary files that never outlive a call
//! - Reading node and storage facts from members
//! - Creating namespaces in members
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Cluster lifecycle service                     │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         KubeGateway                              │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────────┐   │
//! │  │ Join/Detach │ │   Rename    │ │  Cluster info / NS      │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────────┘   │
//! │                         │                                       │
//! │               ┌─────────┴─────────┐                            │
//! │               ▼                   ▼                            │
//! │        ┌───────────┐       ┌───────────┐                       │
//! │        │ Staged    │       │ Membership│                       │
//! │        │ Credential│       │ Secret    │                       │
//! │        └───────────┘       └───────────┘                       │
//! └─────────────────────────────────────────────────────────────────┘
//!                │                              │
//!                ▼                              ▼
//!      Member API servers               Hub API server
//! ```
//!
//! # Example
//!
//! ```no_run
//! use hubfleet_core::ClusterName;
//! use hubfleet_membership::{ControlPlaneGateway, Credential, KubeGateway, MembershipConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = KubeGateway::new(MembershipConfig::from_env()).await?;
//!
//! let name = ClusterName::new("east-1")?;
//! let credential = Credential::from_kubeconfig(std::fs::read_to_string("east-1.yaml")?);
//! let endpoint = gateway.join(&name, &credential).await?;
//! println!("Joined {name} at {endpoint}");
//!
//! let info = gateway.cluster_info(&name).await?;
//! println!("{} workers", info.worker_number);
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without real clusters, enable the `test-utils` feature and use
//! [`MockGateway`], which supports per-operation fault injection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod credential;
pub mod error;
pub mod gateway;
pub mod quantity;
pub mod secret;
pub mod types;

pub use credential::{Credential, StagedCredential};
pub use error::{GatewayError, Result};
pub use gateway::{ControlPlaneGateway, KubeGateway};
pub use types::{ClusterInfo, MembershipConfig, NamespaceOutcome};

#[cfg(any(test, feature = "test-utils"))]
pub use gateway::mock::{GatewayOp, MockGateway};
