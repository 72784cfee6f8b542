//! Mutation planning.
//!
//! A plan derives the target tag from the source commit, verifies every
//! service's image concurrently, and builds the overlay mutation. Planning
//! is all-or-nothing: if any service's image is missing, no mutation is
//! produced at all — services within an environment move together.

use futures::future::join_all;
use std::sync::Arc;

use crate::error::EngineError;
use uplift_core::{
    short_sha, ConfigurationMutation, Environment, EnvironmentRegistry, ImageReference,
    MutationEdit,
};
use uplift_publish::overlay::{self, Overlay};
use uplift_publish::{ConfigStore, StoreError};
use uplift_registry::ImageResolver;

/// A planned promotion: the verified images and the mutation to publish.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Target environment name.
    pub environment: String,
    /// Derived tag every service moves to.
    pub target_tag: String,
    /// Verified image references, one per service.
    pub images: Vec<ImageReference>,
    /// The overlay mutation. Empty when the environment is already at the
    /// target tag.
    pub mutation: ConfigurationMutation,
}

/// Plans promotions against the environment registry and current tree.
pub struct Planner {
    registry: EnvironmentRegistry,
    resolver: Arc<ImageResolver>,
    store: Arc<dyn ConfigStore>,
}

impl Planner {
    /// Build a planner.
    pub fn new(
        registry: EnvironmentRegistry,
        resolver: Arc<ImageResolver>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            registry,
            resolver,
            store,
        }
    }

    /// Look up an environment, failing with `UnknownEnvironment`.
    pub fn environment(&self, name: &str) -> Result<&Environment, EngineError> {
        self.registry
            .get(name)
            .ok_or_else(|| EngineError::UnknownEnvironment {
                name: name.to_string(),
            })
    }

    /// Plan the mutation promoting `source_commit` into an environment.
    pub async fn plan(
        &self,
        source_commit: &str,
        environment: &str,
    ) -> Result<Plan, EngineError> {
        let env = self.environment(environment)?;
        let target_tag = format!("{}-{}", env.image_tag_prefix, short_sha(source_commit));

        // Fan out one resolution per service and wait for all of them.
        // Any missing image aborts the whole plan; a partial promotion
        // across services is never produced.
        let checks = env
            .services
            .iter()
            .map(|service| self.resolver.resolve(&service.repository, &target_tag));
        let mut images = Vec::with_capacity(env.services.len());
        for result in join_all(checks).await {
            images.push(result?);
        }

        let kustomization = env.kustomization_path();
        let current = match self.store.read_file(&kustomization).await {
            Ok(contents) => Overlay::parse(&kustomization, &contents)?,
            // A fresh environment directory starts from an empty overlay.
            Err(StoreError::MissingFile { .. }) => Overlay::parse(&kustomization, "images: []\n")?,
            Err(err) => return Err(err.into()),
        };

        let edits = env
            .services
            .iter()
            .map(|service| MutationEdit {
                file_path: kustomization.clone(),
                key: overlay::tag_key(&service.name),
                old_value: current.image_tag(&service.name).unwrap_or("").to_string(),
                new_value: target_tag.clone(),
            })
            .collect();

        let mutation = ConfigurationMutation::new(&env.name, env.overlay_root(), edits)?;
        tracing::debug!(
            environment = env.name,
            tag = target_tag,
            services = env.services.len(),
            noop = mutation.is_empty(),
            "planned promotion"
        );

        Ok(Plan {
            environment: env.name.clone(),
            target_tag,
            images,
            mutation,
        })
    }
}
