//! Stable machine-readable failure kinds.
//!
//! Every failure surfaced to a CI caller carries one of these kinds next to
//! its human-readable message, so workflows can branch on the kind without
//! parsing text. The kind strings are part of the external interface and
//! must not change meaning between releases.

use serde::{Deserialize, Serialize};

/// Classification of a promotion outcome or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Target environment is not in the registry. Fatal, no retry.
    UnknownEnvironment,
    /// A required image is absent from the artifact registry. Fatal for
    /// this attempt; the image must be built and pushed first.
    ImageNotFound,
    /// The artifact registry could not be reached. Retried with backoff;
    /// surfaced only after attempts are exhausted.
    RegistryUnavailable,
    /// A promotion policy was violated (e.g. a mutation escaping its
    /// environment overlay). Fatal, never downgraded.
    PolicyViolation,
    /// Concurrent mutation of the same file persisted across one retry.
    /// Fatal, requires manual resolution.
    PublishConflict,
    /// The commit is already the desired state of the environment. Not an
    /// error; reported as a no-op outcome.
    AlreadyPromoted,
    /// Anything without a more specific classification.
    Internal,
}

impl ErrorKind {
    /// Stable string form, suitable for CI status fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownEnvironment => "unknown_environment",
            Self::ImageNotFound => "image_not_found",
            Self::RegistryUnavailable => "registry_unavailable",
            Self::PolicyViolation => "policy_violation",
            Self::PublishConflict => "publish_conflict",
            Self::AlreadyPromoted => "already_promoted",
            Self::Internal => "internal",
        }
    }

    /// Whether a caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RegistryUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
