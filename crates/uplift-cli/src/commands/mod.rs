//! CLI command implementations.

pub mod approvals;
pub mod check;
pub mod promote;
pub mod rollback;
pub mod status;

use anyhow::Context;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use uplift_core::UpliftConfig;
use uplift_engine::{Planner, PromotionEngine, TracingAuditSink};
use uplift_publish::{
    ApprovalGate, ChangePublisher, ConfigStore, GitHubReviews, GitStore, InMemoryReviews,
    ReviewSystem,
};
use uplift_registry::{HttpRegistryClient, ImageResolver};
use uplift_sync::{ArgoCdClient, SyncController};

pub(crate) fn load_config(path: &Path) -> anyhow::Result<UpliftConfig> {
    UpliftConfig::load_from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Wire a promotion engine from configuration.
///
/// The review system is forge-backed when the forge is configured; without
/// one, reviews live only in this process, which is fine while every
/// environment auto-syncs (`uplift check` warns otherwise).
pub(crate) fn build_engine(config: &UpliftConfig) -> anyhow::Result<PromotionEngine> {
    let registry = config
        .environment_registry()
        .context("invalid environment definitions")?;

    let store: Arc<dyn ConfigStore> = Arc::new(GitStore::from_config(&config.repo));

    let client = Arc::new(HttpRegistryClient::from_config(&config.registry));
    let resolver = Arc::new(ImageResolver::new(client, config.registry.retry.clone()));
    let planner = Planner::new(registry, resolver, store.clone());

    let reviews: Arc<dyn ReviewSystem> =
        match (&config.reviews.api_url, &config.reviews.repository) {
            (Some(api_url), Some(repository)) => {
                let token = config
                    .reviews
                    .token_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok());
                Arc::new(GitHubReviews::new(api_url, repository, token, store.clone()))
            }
            _ => Arc::new(InMemoryReviews::new(store.clone())),
        };

    let gate = ApprovalGate::new(config.approvers.clone());
    let publisher = ChangePublisher::new(store.clone(), reviews, gate);

    Ok(PromotionEngine::new(
        planner,
        publisher,
        store,
        Arc::new(TracingAuditSink),
    ))
}

pub(crate) fn build_sync_controller(
    config: &UpliftConfig,
) -> anyhow::Result<Arc<dyn SyncController>> {
    let applications: BTreeMap<String, String> = config
        .environments
        .iter()
        .map(|env| (env.name.clone(), config.application_name(&env.name)))
        .collect();

    let client = ArgoCdClient::from_config(&config.sync, applications)
        .context("sync.server_url is not configured")?;
    Ok(Arc::new(client))
}
