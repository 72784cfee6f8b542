//! Sync controller clients.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::SyncError;
use crate::{SyncState, SyncStatus};
use uplift_core::config::SyncConfig;
use uplift_publish::ConfigStore;

/// A managed resource's drift summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDiff {
    /// Kubernetes kind.
    pub kind: String,
    /// Resource name.
    pub name: String,
    /// Whether live matches desired.
    pub in_sync: bool,
}

/// Read and command the external reconciliation controller.
#[async_trait]
pub trait SyncController: Send + Sync {
    /// Current reconciliation state for an environment.
    async fn get(&self, environment: &str) -> Result<SyncState, SyncError>;

    /// Request a sync; `force` replaces resources instead of patching.
    async fn sync(&self, environment: &str, force: bool) -> Result<(), SyncError>;

    /// Per-resource drift between desired and live state.
    async fn diff(&self, environment: &str) -> Result<Vec<ResourceDiff>, SyncError>;
}

/// ArgoCD API client.
pub struct ArgoCdClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    /// Environment name to ArgoCD application name.
    applications: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ArgoApplication {
    spec: ArgoSpec,
    status: ArgoStatus,
}

#[derive(Debug, Deserialize)]
struct ArgoSpec {
    source: ArgoSource,
}

#[derive(Debug, Deserialize)]
struct ArgoSource {
    #[serde(rename = "targetRevision", default)]
    target_revision: String,
}

#[derive(Debug, Deserialize)]
struct ArgoStatus {
    sync: ArgoSyncStatus,
    #[serde(default)]
    health: ArgoHealth,
}

#[derive(Debug, Deserialize)]
struct ArgoSyncStatus {
    status: String,
    #[serde(default)]
    revision: String,
}

#[derive(Debug, Default, Deserialize)]
struct ArgoHealth {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ArgoManagedResources {
    #[serde(default)]
    items: Vec<ArgoManagedResource>,
}

#[derive(Debug, Deserialize)]
struct ArgoManagedResource {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    name: String,
    /// Present only when the resource has drifted.
    #[serde(default)]
    diff: Option<String>,
}

impl ArgoCdClient {
    /// Build a client from sync configuration. Returns `None` when no
    /// server URL is configured.
    pub fn from_config(config: &SyncConfig, applications: BTreeMap<String, String>) -> Option<Self> {
        let base_url = config.server_url.clone()?;
        let token = config
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        Some(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            applications,
        })
    }

    fn application(&self, environment: &str) -> Result<&str, SyncError> {
        self.applications
            .get(environment)
            .map(String::as_str)
            .ok_or_else(|| SyncError::UnknownApplication {
                environment: environment.to_string(),
            })
    }

    fn request(&self, method: reqwest::Method, path: String) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, SyncError> {
        let response = req.send().await.map_err(|e| SyncError::Api(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Api(format!("HTTP {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| SyncError::Api(e.to_string()))
    }

    fn map_status(sync: &str, health: &str) -> SyncStatus {
        match (health, sync) {
            ("Degraded", _) => SyncStatus::Degraded,
            ("Progressing", _) => SyncStatus::Progressing,
            (_, "Synced") => SyncStatus::Synced,
            _ => SyncStatus::OutOfSync,
        }
    }
}

#[async_trait]
impl SyncController for ArgoCdClient {
    async fn get(&self, environment: &str) -> Result<SyncState, SyncError> {
        let app = self.application(environment)?;
        let application: ArgoApplication = self
            .send(self.request(
                reqwest::Method::GET,
                format!("/api/v1/applications/{app}"),
            ))
            .await?;
        Ok(SyncState {
            desired_revision: application.spec.source.target_revision,
            live_revision: application.status.sync.revision,
            status: Self::map_status(
                &application.status.sync.status,
                &application.status.health.status,
            ),
        })
    }

    async fn sync(&self, environment: &str, force: bool) -> Result<(), SyncError> {
        let app = self.application(environment)?;
        tracing::info!(environment, application = app, force, "requesting sync");
        let _: serde_json::Value = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    format!("/api/v1/applications/{app}/sync"),
                )
                .json(&serde_json::json!({
                    "prune": true,
                    "strategy": { "apply": { "force": force } },
                })),
            )
            .await?;
        Ok(())
    }

    async fn diff(&self, environment: &str) -> Result<Vec<ResourceDiff>, SyncError> {
        let app = self.application(environment)?;
        let resources: ArgoManagedResources = self
            .send(self.request(
                reqwest::Method::GET,
                format!("/api/v1/applications/{app}/managed-resources"),
            ))
            .await?;
        Ok(resources
            .items
            .into_iter()
            .map(|r| ResourceDiff {
                kind: r.kind,
                name: r.name,
                in_sync: r.diff.is_none(),
            })
            .collect())
    }
}

/// Sync controller view derived from the configuration store.
///
/// Desired revision is the store's trunk head; live revisions are recorded
/// by the test or embedding harness. Mirrors an auto-sync controller
/// closely enough to verify that gated mutations stay out of the desired
/// state until merged.
pub struct StoreSyncController {
    store: Arc<dyn ConfigStore>,
    live: RwLock<BTreeMap<String, String>>,
}

impl StoreSyncController {
    /// Build a view over a store.
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            live: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record an environment's live revision, as a reconciler would after
    /// applying it.
    pub fn set_live(&self, environment: &str, revision: &str) {
        let mut live = self.live.write().unwrap_or_else(|e| e.into_inner());
        live.insert(environment.to_string(), revision.to_string());
    }
}

#[async_trait]
impl SyncController for StoreSyncController {
    async fn get(&self, environment: &str) -> Result<SyncState, SyncError> {
        let desired = self.store.head().await?;
        let live = {
            let live = self.live.read().unwrap_or_else(|e| e.into_inner());
            live.get(environment).cloned().unwrap_or_default()
        };
        let status = if live == desired {
            SyncStatus::Synced
        } else {
            SyncStatus::OutOfSync
        };
        Ok(SyncState {
            desired_revision: desired,
            live_revision: live,
            status,
        })
    }

    async fn sync(&self, environment: &str, _force: bool) -> Result<(), SyncError> {
        let desired = self.store.head().await?;
        self.set_live(environment, &desired);
        Ok(())
    }

    async fn diff(&self, environment: &str) -> Result<Vec<ResourceDiff>, SyncError> {
        let state = self.get(environment).await?;
        Ok(vec![ResourceDiff {
            kind: "Kustomization".to_string(),
            name: environment.to_string(),
            in_sync: state.status == SyncStatus::Synced,
        }])
    }
}
