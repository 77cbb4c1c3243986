//! Core types and utilities for hubfleet.
//!
//! This crate provides the foundational types used throughout the hubfleet workspace:
//!
//! - **Identifiers**: the validated [`ClusterName`] and the reserved hub cluster name
//!
//! # Example
//!
//! ```
//! use hubfleet_core::{ClusterName, LOCAL_CLUSTER_NAME};
//!
//! let name = ClusterName::new("east-1").unwrap();
//! assert!(!name.is_local());
//!
//! let local = ClusterName::local();
//! assert_eq!(local.as_str(), LOCAL_CLUSTER_NAME);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;

pub use ids::{ClusterName, IdError, LOCAL_CLUSTER_NAME, MAX_NAME_LEN};
