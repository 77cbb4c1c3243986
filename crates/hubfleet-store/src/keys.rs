//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions to encode and decode keys for the cluster
//! record and its creation-time index. Index keys sort chronologically so that
//! listing is a plain forward or reverse scan.

use chrono::{DateTime, Utc};
use hubfleet_core::ClusterName;

/// Width of the encoded timestamp prefix.
const TIMESTAMP_LEN: usize = 8;

/// Encode a cluster key (just the cluster name bytes).
#[must_use]
pub fn cluster_key(name: &ClusterName) -> Vec<u8> {
    name.as_bytes().to_vec()
}

/// Encode a timestamp so that byte order matches chronological order.
///
/// The sign bit is flipped so pre-epoch timestamps sort before post-epoch ones.
#[must_use]
pub fn encode_timestamp(ts: DateTime<Utc>) -> [u8; TIMESTAMP_LEN] {
    (ts.timestamp_millis() ^ i64::MIN).to_be_bytes()
}

/// Encode a creation-time index key: `create_time || name`.
#[must_use]
pub fn create_time_key(create_time: DateTime<Utc>, name: &ClusterName) -> Vec<u8> {
    let mut key = Vec::with_capacity(TIMESTAMP_LEN + name.as_bytes().len());
    key.extend_from_slice(&encode_timestamp(create_time));
    key.extend_from_slice(name.as_bytes());
    key
}

/// Extract the cluster name from a creation-time index key.
///
/// Returns `None` if the key is too short or the name is not valid.
#[must_use]
pub fn extract_name_from_create_time_key(key: &[u8]) -> Option<ClusterName> {
    let name = key.get(TIMESTAMP_LEN..)?;
    let name = std::str::from_utf8(name).ok()?;
    ClusterName::new(name).ok()
}
