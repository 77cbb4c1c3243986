//! Cluster identifiers for hubfleet.
//!
//! A cluster is addressed by its name everywhere: in the registry, in the
//! control plane membership, and in every API path. This module provides the
//! validated [`ClusterName`] newtype and the reserved hub cluster name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The reserved name of the hub cluster the control plane itself runs on.
pub const LOCAL_CLUSTER_NAME: &str = "local";

/// Maximum length of a Kubernetes object name (a DNS-1123 subdomain).
const DNS_SUBDOMAIN_MAX_LEN: usize = 253;

/// Separator between a cluster name and its transitional suffix.
const TRANSITIONAL_INFIX: &str = "-tmp-";

/// Length of the random suffix appended to transitional names.
const TRANSITIONAL_SUFFIX_LEN: usize = 8;

/// Maximum length of a cluster name.
///
/// Leaves room for the transitional suffix so that every derived name is
/// still a valid object name.
pub const MAX_NAME_LEN: usize =
    DNS_SUBDOMAIN_MAX_LEN - TRANSITIONAL_INFIX.len() - TRANSITIONAL_SUFFIX_LEN;

/// A validated cluster name.
///
/// Names are lowercase DNS-1123 subdomains of at most [`MAX_NAME_LEN`]
/// characters: dot-separated labels of lowercase alphanumerics and `-`, each
/// starting and ending with an alphanumeric character.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterName(String);

impl ClusterName {
    /// Parse and validate a cluster name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, too long, or contains invalid characters.
    pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        validate(&name)?;
        Ok(Self(name))
    }

    /// The reserved hub cluster name.
    #[must_use]
    pub fn local() -> Self {
        Self(LOCAL_CLUSTER_NAME.to_string())
    }

    /// Returns true if this is the reserved hub cluster name.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0 == LOCAL_CLUSTER_NAME
    }

    /// Derive a fresh transitional name of the form `<name>-tmp-<suffix>`.
    ///
    /// The suffix is random, so two calls never return the same name.
    #[must_use]
    pub fn transitional(&self) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}{TRANSITIONAL_INFIX}{}",
            self.0,
            &suffix[..TRANSITIONAL_SUFFIX_LEN]
        ))
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the name as bytes, used for storage keys.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Returns true if `query` is a substring of this name.
    #[must_use]
    pub fn fuzzy_matches(&self, query: &str) -> bool {
        self.0.contains(query)
    }
}

fn validate(name: &str) -> Result<(), IdError> {
    if name.is_empty() {
        return Err(IdError::Empty);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(IdError::TooLong {
            max: MAX_NAME_LEN,
            got: name.len(),
        });
    }
    if let Some(c) = name
        .chars()
        .find(|&c| !(is_label_char(c) || c == '-' || c == '.'))
    {
        return Err(IdError::InvalidCharacter(c));
    }
    if !name.starts_with(is_label_char) {
        return Err(IdError::InvalidStart);
    }
    if !name.ends_with(is_label_char) {
        return Err(IdError::InvalidEnd);
    }
    if let Some(label) = name
        .split('.')
        .find(|label| !(label.starts_with(is_label_char) && label.ends_with(is_label_char)))
    {
        return Err(IdError::InvalidLabel(label.to_string()));
    }
    Ok(())
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

impl FromStr for ClusterName {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for ClusterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClusterName({})", self.0)
    }
}

impl fmt::Display for ClusterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ClusterName {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClusterName> for String {
    fn from(name: ClusterName) -> Self {
        name.0
    }
}

impl AsRef<str> for ClusterName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ClusterName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The name is empty.
    #[error("cluster name must not be empty")]
    Empty,

    /// The name exceeds the maximum length.
    #[error("cluster name too long: max {max} characters, got {got}")]
    TooLong {
        /// The maximum number of characters.
        max: usize,
        /// The actual number of characters.
        got: usize,
    },

    /// The name does not start with a lowercase alphanumeric character.
    #[error("cluster name must start with a lowercase alphanumeric character")]
    InvalidStart,

    /// The name does not end with a lowercase alphanumeric character.
    #[error("cluster name must end with a lowercase alphanumeric character")]
    InvalidEnd,

    /// A dot-separated label is empty or has a `-` at either end.
    #[error("invalid label in cluster name: {0:?}")]
    InvalidLabel(String),

    /// The name contains a character outside the allowed set.
    #[error("invalid character in cluster name: {0:?}")]
    InvalidCharacter(char),
}
