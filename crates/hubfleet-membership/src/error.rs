//! Error types for the membership crate.

use thiserror::Error;

/// Errors that can occur during control plane membership operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// A membership already exists under the requested name.
    #[error("Cluster already joined: {0}")]
    AlreadyJoined(String),

    /// No membership exists under the requested name.
    #[error("Cluster not joined: {0}")]
    NotJoined(String),

    /// The member cluster refused the request.
    #[error("Permission denied: {0}")]
    NoPermission(String),

    /// The credential could not be parsed into a usable client configuration.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// The member cluster's API server could not be reached.
    #[error("Cluster unreachable: {0}")]
    Unreachable(String),

    /// The credential could not be staged for use.
    #[error("Credential staging failed: {0}")]
    Staging(#[from] std::io::Error),

    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// Any other upstream failure.
    #[error("Upstream failure: {0}")]
    Upstream(String),
}

impl GatewayError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::KubeApi(_) | Self::Unreachable(_) | Self::Upstream(_)
        )
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::AlreadyJoined(_) => 409,
            Self::NotJoined(_) => 404,
            Self::NoPermission(_) => 403,
            Self::InvalidCredential(_) => 400,
            Self::Staging(_) => 500,
            Self::KubeApi(_) | Self::Unreachable(_) | Self::Upstream(_) => 503,
        }
    }
}

/// A specialized Result type for membership operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
