//! Error types for sync controller access.

use thiserror::Error;

/// Errors raised while talking to the sync controller.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The controller has no application for this environment.
    #[error("no application registered for environment {environment}")]
    UnknownApplication {
        /// Environment name.
        environment: String,
    },

    /// The controller API could not be reached or rejected the request.
    #[error("sync controller error: {0}")]
    Api(String),

    /// Store failure while deriving the desired revision.
    #[error(transparent)]
    Store(#[from] uplift_publish::StoreError),
}
