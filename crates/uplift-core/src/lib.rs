//! Core data model for the Uplift promotion engine.
//!
//! Defines the types shared across all Uplift crates: environments and their
//! sync policies, promotion requests, image references, configuration
//! mutations, and the stable error-kind taxonomy surfaced to CI callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod config;
pub mod environment;
pub mod error;
pub mod mutation;

pub use config::{ConfigError, RegistryConfig, RepoConfig, RetryConfig, UpliftConfig};
pub use environment::{Environment, EnvironmentRegistry, ResourceLimits, ServiceSpec, SyncPolicy};
pub use error::ErrorKind;
pub use mutation::{ConfigurationMutation, MutationEdit, MutationError};

/// Number of leading commit characters used in derived image tags.
pub const SHORT_SHA_LEN: usize = 7;

/// Truncate a full commit SHA to the short form used in image tags.
///
/// Tags are derived as `<prefix>-<short_sha>`, so the same commit always
/// produces the same tag for a given environment.
pub fn short_sha(commit: &str) -> String {
    let commit = commit.trim();
    commit.chars().take(SHORT_SHA_LEN).collect()
}

/// A single promotion attempt.
///
/// Immutable once created; a retried or changed promotion is a new request,
/// never a mutation of an old one. The request itself is not persisted — the
/// audit trail is the commit history it produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionRequest {
    /// Unique request ID.
    pub id: Uuid,
    /// Full commit SHA of the build being promoted.
    pub source_commit: String,
    /// Name of the target environment (must exist in the registry).
    pub target_environment: String,
    /// Who asked for the promotion (CI identity or operator).
    pub requested_by: String,
    /// When the request was created.
    pub timestamp: DateTime<Utc>,
}

impl PromotionRequest {
    /// Create a new promotion request stamped with the current time.
    pub fn new(
        source_commit: impl Into<String>,
        target_environment: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_commit: source_commit.into(),
            target_environment: target_environment.into(),
            requested_by: requested_by.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A fully qualified container image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Repository, e.g. `ghcr.io/acme/ledger`.
    pub repository: String,
    /// Tag, e.g. `main-abc1234`.
    pub tag: String,
}

impl ImageReference {
    /// Build a reference from a repository and a tag.
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Derive the reference for a commit promoted into an environment.
    ///
    /// The tag is `<prefix>-<short_sha(commit)>`; two promotions of the same
    /// commit into the same environment resolve to the identical reference.
    pub fn for_commit(repository: &str, tag_prefix: &str, commit: &str) -> Self {
        Self {
            repository: repository.to_string(),
            tag: format!("{}-{}", tag_prefix, short_sha(commit)),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_sha_truncates_to_seven() {
        assert_eq!(short_sha("abc1234deadbeef"), "abc1234");
        assert_eq!(short_sha("abc12"), "abc12");
        assert_eq!(short_sha("  abc1234  "), "abc1234");
    }

    #[test]
    fn tag_derivation_is_deterministic() {
        let a = ImageReference::for_commit("ghcr.io/acme/ledger", "main", "abc1234deadbeef");
        let b = ImageReference::for_commit("ghcr.io/acme/ledger", "main", "abc1234deadbeef");
        assert_eq!(a, b);
        assert_eq!(a.tag, "main-abc1234");
        assert_eq!(a.to_string(), "ghcr.io/acme/ledger:main-abc1234");
    }

    #[test]
    fn different_environments_get_different_tags() {
        let qa = ImageReference::for_commit("ghcr.io/acme/ledger", "qa", "abc1234deadbeef");
        let stg = ImageReference::for_commit("ghcr.io/acme/ledger", "stg", "abc1234deadbeef");
        assert_ne!(qa.tag, stg.tag);
    }
}
