//! Error types for registry access.

use thiserror::Error;
use uplift_core::ErrorKind;

/// Errors raised while querying the artifact registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The image does not exist in the registry. Not retryable; the build
    /// must be pushed before promotion can proceed.
    #[error("image {repository}:{tag} not found in registry")]
    NotFound {
        /// Image repository.
        repository: String,
        /// Missing tag.
        tag: String,
    },

    /// The registry could not be reached or answered with a server error.
    /// Retryable with backoff.
    #[error("registry unavailable: {reason}")]
    Unavailable {
        /// Human-readable cause.
        reason: String,
    },

    /// The registry rejected our credentials. Not retryable.
    #[error("registry denied access to {repository}: {reason}")]
    Denied {
        /// Image repository.
        repository: String,
        /// Human-readable cause.
        reason: String,
    },
}

impl RegistryError {
    /// Stable kind for CI surfaces.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::ImageNotFound,
            Self::Unavailable { .. } => ErrorKind::RegistryUnavailable,
            Self::Denied { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the resolver should retry after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
