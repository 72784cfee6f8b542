//! Error types for the publish crate.

use std::path::PathBuf;
use thiserror::Error;
use uplift_core::ErrorKind;

/// Errors raised by the versioned configuration store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A file could not be read or written.
    #[error("store IO error on {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A file expected in the tree is absent.
    #[error("file not found in config tree: {path}")]
    MissingFile {
        /// Missing path.
        path: PathBuf,
    },

    /// A git invocation failed.
    #[error("git {command} failed: {stderr}")]
    Git {
        /// Subcommand that failed.
        command: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The commit raced with a concurrent mutation of the tree.
    #[error("commit conflicts with a concurrent change: {message}")]
    Conflict {
        /// Human-readable cause.
        message: String,
    },
}

/// Errors raised while reading or editing overlay files.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The overlay file is not valid kustomization YAML.
    #[error("failed to parse overlay {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The overlay could not be re-serialized.
    #[error("failed to serialize overlay: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Errors raised while applying a mutation to the tree.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The tree no longer holds the value the mutation was planned against.
    #[error(
        "stale edit to {file}: {key} expected {expected:?}, tree has {found:?}"
    )]
    Stale {
        /// File the edit targets.
        file: PathBuf,
        /// Edited key.
        key: String,
        /// Value the plan recorded.
        expected: String,
        /// Value currently in the tree.
        found: String,
    },

    /// Overlay parse or serialize failure.
    #[error(transparent)]
    Overlay(#[from] OverlayError),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by the review system.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// No review with the given id.
    #[error("review {id} not found")]
    NotFound {
        /// Unknown review id.
        id: String,
    },

    /// The review is in a state that forbids the operation.
    #[error("review {id} is {status}; {operation} is not allowed")]
    InvalidState {
        /// Review id.
        id: String,
        /// Current status.
        status: String,
        /// Operation attempted.
        operation: String,
    },

    /// The review was superseded by a newer promotion and must not merge.
    #[error("review {id} was superseded by {superseded_by}")]
    Superseded {
        /// Stale review id.
        id: String,
        /// The review that replaced it.
        superseded_by: String,
    },

    /// The forge API failed.
    #[error("review forge error: {0}")]
    Forge(String),

    /// Applying the review's mutation failed.
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// Store failure outside mutation application.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while publishing a mutation.
#[derive(Debug, Error)]
pub enum PublishError {
    /// A concurrent change to the same files persisted across the single
    /// conflict retry. Requires manual resolution.
    #[error("publish conflict: {message}")]
    Conflict {
        /// Human-readable cause.
        message: String,
    },

    /// Store failure other than a conflict.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Mutation application failure other than staleness.
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// Overlay parse or serialize failure.
    #[error(transparent)]
    Overlay(#[from] OverlayError),

    /// Review system failure.
    #[error(transparent)]
    Review(#[from] ReviewError),
}

impl PublishError {
    /// Stable kind for CI surfaces.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::PublishConflict,
            Self::Store(StoreError::Conflict { .. }) => ErrorKind::PublishConflict,
            Self::Apply(ApplyError::Stale { .. }) => ErrorKind::PublishConflict,
            Self::Store(_) | Self::Apply(_) | Self::Overlay(_) | Self::Review(_) => {
                ErrorKind::Internal
            }
        }
    }
}
