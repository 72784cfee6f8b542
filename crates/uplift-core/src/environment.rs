//! Environment definitions and the static environment registry.
//!
//! An [`Environment`] is immutable once loaded: it changes only through a
//! reviewed configuration update, never at runtime. The registry is the
//! lookup table the promotion engine consults for every request.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::config::ConfigError;

/// How changes to an environment's desired state reach the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncPolicy {
    /// The sync controller applies committed changes automatically, with
    /// self-healing and pruning. Mutations are committed directly to trunk.
    Auto,
    /// Changes are staged behind a review request and applied only after an
    /// explicit sync. Used for environments that require human sign-off.
    Manual {
        /// Minimum number of distinct approvers across all groups.
        #[serde(default = "default_required_approvals")]
        required_approvals: u32,
        /// Groups whose approval is required before merge.
        #[serde(default)]
        approver_groups: BTreeSet<String>,
    },
}

fn default_required_approvals() -> u32 {
    1
}

impl SyncPolicy {
    /// Whether this policy routes mutations through a review request.
    pub fn requires_review(&self) -> bool {
        matches!(self, Self::Manual { .. })
    }
}

/// CPU/memory ceilings applied to each service in the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU limit, e.g. `"500m"`.
    #[serde(default)]
    pub cpu: Option<String>,
    /// Memory limit, e.g. `"512Mi"`.
    #[serde(default)]
    pub memory: Option<String>,
}

/// A service deployed into an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service name as it appears in the overlay's image list.
    pub name: String,
    /// Image repository the service is built into.
    pub repository: String,
}

/// A deployment environment (dev, qa, staging, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Environment name; also the overlay directory name.
    pub name: String,
    /// Kubernetes namespace the environment deploys into.
    pub namespace: String,
    /// Sync policy (auto-sync or review-gated manual sync).
    pub sync_policy: SyncPolicy,
    /// Prefix for derived image tags, e.g. `main`, `qa`, `stg`.
    pub image_tag_prefix: String,
    /// Replica count per service.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Resource ceilings.
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    /// Services that move together through this environment.
    pub services: Vec<ServiceSpec>,
}

fn default_replicas() -> u32 {
    1
}

impl Environment {
    /// Overlay directory for this environment, relative to the config repo
    /// root, e.g. `environments/qa`.
    pub fn overlay_root(&self) -> PathBuf {
        PathBuf::from("environments").join(&self.name)
    }

    /// Path of the kustomization file carrying the image tags.
    pub fn kustomization_path(&self) -> PathBuf {
        self.overlay_root().join("kustomization.yaml")
    }

    /// Approver groups required by this environment, empty for auto-sync.
    pub fn approver_groups(&self) -> BTreeSet<String> {
        match &self.sync_policy {
            SyncPolicy::Auto => BTreeSet::new(),
            SyncPolicy::Manual {
                approver_groups, ..
            } => approver_groups.clone(),
        }
    }
}

/// Read-only lookup table of environments, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentRegistry {
    environments: BTreeMap<String, Environment>,
}

impl EnvironmentRegistry {
    /// Build a registry, rejecting duplicate environment names.
    pub fn new(environments: Vec<Environment>) -> Result<Self, ConfigError> {
        let mut map = BTreeMap::new();
        for env in environments {
            if map.contains_key(&env.name) {
                return Err(ConfigError::DuplicateEnvironment { name: env.name });
            }
            map.insert(env.name.clone(), env);
        }
        Ok(Self { environments: map })
    }

    /// Look up an environment by name.
    pub fn get(&self, name: &str) -> Option<&Environment> {
        self.environments.get(name)
    }

    /// Iterate environments in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Environment> {
        self.environments.values()
    }

    /// All environment names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.environments.keys().map(String::as_str).collect()
    }

    /// Number of registered environments.
    pub fn len(&self) -> usize {
        self.environments.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}
