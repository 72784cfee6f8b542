//! Error type for the promotion engine.

use thiserror::Error;
use uplift_core::{ErrorKind, MutationError};
use uplift_publish::{OverlayError, PublishError, StoreError};
use uplift_registry::RegistryError;

/// Errors raised while planning or executing a promotion.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The target environment is not in the registry.
    #[error("unknown environment: {name}")]
    UnknownEnvironment {
        /// Requested environment name.
        name: String,
    },

    /// Image verification failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The planned mutation violated promotion policy.
    #[error(transparent)]
    Policy(#[from] MutationError),

    /// Publication failed.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Reading the current tree during planning failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Parsing the current overlay during planning failed.
    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

impl EngineError {
    /// Stable kind for CI surfaces.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownEnvironment { .. } => ErrorKind::UnknownEnvironment,
            Self::Registry(err) => err.kind(),
            Self::Policy(_) => ErrorKind::PolicyViolation,
            Self::Publish(err) => err.kind(),
            Self::Store(_) | Self::Overlay(_) => ErrorKind::Internal,
        }
    }
}
