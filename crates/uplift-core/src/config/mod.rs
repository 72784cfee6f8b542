//! Configuration for the Uplift promotion engine.
//!
//! Configuration is loaded from a single `uplift.yaml` plus optional
//! per-environment files in an environments directory, and combined into one
//! [`UpliftConfig`]. Environment definitions are immutable at runtime: they
//! change only through a reviewed edit of these files.
//!
//! # Configuration files
//!
//! - **uplift.yaml**: config repo location, artifact registry endpoint,
//!   review forge, sync controller, approver group membership.
//! - **environments/*.yaml** (optional): one environment definition per file,
//!   merged with any inline `environments:` list.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::environment::{Environment, EnvironmentRegistry};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file was not valid YAML for its schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// Two environment definitions share a name.
    #[error("duplicate environment definition: {name}")]
    DuplicateEnvironment {
        /// The duplicated name.
        name: String,
    },
}

/// Location of the versioned configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Local checkout of the config repository.
    pub path: PathBuf,
    /// Trunk branch direct commits land on.
    #[serde(default = "default_trunk")]
    pub trunk_branch: String,
    /// Remote pushed to after committing.
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Whether to push after each commit. Disabled in tests and for
    /// local-only checkouts.
    #[serde(default = "default_push")]
    pub push: bool,
}

fn default_trunk() -> String {
    "main".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_push() -> bool {
    true
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            trunk_branch: default_trunk(),
            remote: default_remote(),
            push: default_push(),
        }
    }
}

/// Retry policy for retryable failures (registry unavailability).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    200
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Artifact registry endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the registry API, e.g. `https://ghcr.io`.
    #[serde(default)]
    pub url: String,
    /// Environment variable holding a bearer token, if the registry
    /// requires authentication.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Retry policy for unavailability.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Review forge (pull request) endpoint, used for manual-sync environments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewsConfig {
    /// Base API URL, e.g. `https://api.github.com`.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Repository in `owner/name` form.
    #[serde(default)]
    pub repository: Option<String>,
    /// Environment variable holding the forge token.
    #[serde(default)]
    pub token_env: Option<String>,
}

/// Sync controller (ArgoCD) endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base API URL of the ArgoCD server.
    #[serde(default)]
    pub server_url: Option<String>,
    /// Environment variable holding the ArgoCD token.
    #[serde(default)]
    pub token_env: Option<String>,
    /// ArgoCD application name per environment. Environments absent from
    /// this map default to `<project>-<environment>`.
    #[serde(default)]
    pub applications: BTreeMap<String, String>,
}

/// Complete Uplift configuration loaded from files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpliftConfig {
    /// Project name, used in commit messages and default app names.
    #[serde(default)]
    pub project: Option<String>,

    /// Versioned configuration tree.
    #[serde(default)]
    pub repo: RepoConfig,

    /// Artifact registry.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Review forge, required for manual-sync environments.
    #[serde(default)]
    pub reviews: ReviewsConfig,

    /// Sync controller.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Approver group membership: group name to member logins.
    #[serde(default)]
    pub approvers: BTreeMap<String, BTreeSet<String>>,

    /// Inline environment definitions.
    #[serde(default)]
    pub environments: Vec<Environment>,

    /// Directory of per-environment definition files, merged with the
    /// inline list.
    #[serde(default)]
    pub environments_dir: Option<PathBuf>,
}

impl UpliftConfig {
    /// Load configuration from a YAML file, merging any environments
    /// directory it points at.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(dir) = config.environments_dir.clone() {
            // Relative paths resolve against the config file's directory.
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            let dir = if dir.is_absolute() { dir } else { base.join(dir) };
            config.environments.extend(Self::load_environments_dir(&dir)?);
        }

        Ok(config)
    }

    /// Load every `*.yaml` file in a directory as one environment each.
    fn load_environments_dir(dir: &Path) -> Result<Vec<Environment>, ConfigError> {
        let mut out = Vec::new();
        let entries = fs::read_dir(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        paths.sort();
        for file in paths {
            let contents = fs::read_to_string(&file).map_err(|source| ConfigError::Io {
                path: file.clone(),
                source,
            })?;
            let env: Environment =
                serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: file.clone(),
                    source,
                })?;
            out.push(env);
        }
        Ok(out)
    }

    /// Build the environment registry from the merged definitions.
    pub fn environment_registry(&self) -> Result<EnvironmentRegistry, ConfigError> {
        EnvironmentRegistry::new(self.environments.clone())
    }

    /// ArgoCD application name for an environment.
    pub fn application_name(&self, environment: &str) -> String {
        self.sync
            .applications
            .get(environment)
            .cloned()
            .unwrap_or_else(|| {
                let project = self.project.as_deref().unwrap_or("ledger");
                format!("{project}-{environment}")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
project: ledger
repo:
  path: /srv/ledger-deploy
  trunk_branch: main
  push: false
registry:
  url: https://ghcr.io
  retry:
    max_attempts: 3
    base_delay_ms: 50
approvers:
  qa-team: [alice, bob]
  tech-lead: [carol]
environments:
  - name: dev
    namespace: ledger-dev
    sync_policy:
      mode: auto
    image_tag_prefix: main
    services:
      - name: ledger
        repository: ghcr.io/acme/ledger
      - name: ledger-backoffice
        repository: ghcr.io/acme/ledger-backoffice
  - name: staging
    namespace: ledger-staging
    sync_policy:
      mode: manual
      required_approvals: 2
      approver_groups: [qa-team, tech-lead]
    image_tag_prefix: stg
    replicas: 2
    services:
      - name: ledger
        repository: ghcr.io/acme/ledger
"#;

    #[test]
    fn loads_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = UpliftConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.project.as_deref(), Some("ledger"));
        assert_eq!(config.registry.retry.max_attempts, 3);
        assert!(!config.repo.push);

        let registry = config.environment_registry().unwrap();
        assert_eq!(registry.len(), 2);
        let staging = registry.get("staging").unwrap();
        assert!(staging.sync_policy.requires_review());
        assert_eq!(staging.replicas, 2);
    }

    #[test]
    fn application_name_defaults_to_project_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = UpliftConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.application_name("qa"), "ledger-qa");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = UpliftConfig::load_from_file(Path::new("/nonexistent/uplift.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
