//! Change publisher: turns a planned mutation into a durable change.
//!
//! Dispatches on the environment's sync policy: auto-sync environments get
//! a direct trunk commit; manual-sync environments get a review request
//! carrying the mutation, released by the approval gate. Publishing is
//! idempotent under retry and survives one concurrent-writer conflict.

use std::sync::Arc;

use crate::approval::{ApprovalCheck, ApprovalGate};
use crate::error::{ApplyError, PublishError, StoreError};
use crate::overlay::{self, Applied};
use crate::review::{ReviewId, ReviewSystem};
use crate::store::ConfigStore;
use uplift_core::{ConfigurationMutation, Environment, SyncPolicy};

/// Outcome of publishing a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    /// Committed directly to trunk.
    Committed {
        /// The new trunk head.
        sha: String,
    },
    /// Staged behind a review request.
    ReviewOpened {
        /// The opened review.
        review_id: ReviewId,
    },
    /// The tree already holds every edit; nothing was written.
    AlreadyApplied,
}

/// Publishes mutations to the versioned configuration store.
pub struct ChangePublisher {
    store: Arc<dyn ConfigStore>,
    reviews: Arc<dyn ReviewSystem>,
    gate: ApprovalGate,
}

impl ChangePublisher {
    /// Build a publisher over a store and review system.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        reviews: Arc<dyn ReviewSystem>,
        gate: ApprovalGate,
    ) -> Self {
        Self {
            store,
            reviews,
            gate,
        }
    }

    /// The approval gate used for review-gated environments.
    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    /// Publish a mutation according to the environment's sync policy.
    pub async fn publish(
        &self,
        mutation: &ConfigurationMutation,
        environment: &Environment,
    ) -> Result<PublishResult, PublishError> {
        match &environment.sync_policy {
            SyncPolicy::Auto => self.commit_direct(mutation, environment).await,
            SyncPolicy::Manual { .. } => self.open_review(mutation, environment).await,
        }
    }

    /// Commit the mutation straight to trunk.
    ///
    /// A conflict (stale plan values or a rejected commit) is retried once
    /// after re-fetching the tree; a second conflict is surfaced fatal.
    async fn commit_direct(
        &self,
        mutation: &ConfigurationMutation,
        environment: &Environment,
    ) -> Result<PublishResult, PublishError> {
        match self.try_commit(mutation, environment).await {
            Ok(result) => Ok(result),
            Err(err) if is_conflict(&err) => {
                tracing::warn!(
                    environment = environment.name,
                    error = %err,
                    "publish conflict, re-fetching and retrying once"
                );
                self.store.fetch_latest().await?;
                self.try_commit(mutation, environment)
                    .await
                    .map_err(|retry_err| match retry_err {
                        err if is_conflict(&err) => PublishError::Conflict {
                            message: format!("conflict persisted after retry: {err}"),
                        },
                        other => other,
                    })
            }
            Err(err) => Err(err),
        }
    }

    async fn try_commit(
        &self,
        mutation: &ConfigurationMutation,
        environment: &Environment,
    ) -> Result<PublishResult, PublishError> {
        match overlay::apply_mutation(self.store.as_ref(), mutation).await? {
            Applied::Noop => Ok(PublishResult::AlreadyApplied),
            Applied::Changed(files) => {
                let message = commit_message(mutation, environment);
                let sha = self.store.commit(&message, &files).await?;
                Ok(PublishResult::Committed { sha })
            }
        }
    }

    /// Open a review request carrying the mutation, superseding any still
    /// open review for the same environment.
    async fn open_review(
        &self,
        mutation: &ConfigurationMutation,
        environment: &Environment,
    ) -> Result<PublishResult, PublishError> {
        let title = commit_message(mutation, environment);
        let review_id = self
            .reviews
            .open(&environment.name, &title, mutation)
            .await?;

        // A newer promotion invalidates older pending ones; reject the
        // stale review rather than leaving two in flight.
        for stale in self.reviews.open_reviews_for(&environment.name).await? {
            if stale.id != review_id {
                tracing::info!(
                    stale = %stale.id,
                    superseding = %review_id,
                    environment = environment.name,
                    "superseding stale review"
                );
                self.reviews.supersede(&stale.id, &review_id).await?;
            }
        }

        Ok(PublishResult::ReviewOpened { review_id })
    }

    /// Evaluate the approval gate for a review.
    pub async fn check_approvals(
        &self,
        review_id: &ReviewId,
        environment: &Environment,
    ) -> Result<ApprovalCheck, PublishError> {
        let review = self.reviews.get(review_id).await?;
        Ok(self.gate.check(environment, &review.approvers))
    }

    /// Merge a review if and only if the approval gate is satisfied.
    ///
    /// Returns the merge commit SHA, or `None` while approvals are still
    /// pending. The wait for approvals is unbounded by design; callers
    /// poll or react to events, never busy-wait here.
    pub async fn merge_when_approved(
        &self,
        review_id: &ReviewId,
        environment: &Environment,
    ) -> Result<Option<String>, PublishError> {
        match self.check_approvals(review_id, environment).await? {
            ApprovalCheck::Pending { missing_groups } => {
                tracing::debug!(
                    review = %review_id,
                    ?missing_groups,
                    "approval gate still pending"
                );
                Ok(None)
            }
            ApprovalCheck::Satisfied => {
                let sha = self.reviews.merge(review_id).await?;
                Ok(Some(sha))
            }
        }
    }
}

fn is_conflict(err: &PublishError) -> bool {
    matches!(
        err,
        PublishError::Conflict { .. }
            | PublishError::Store(StoreError::Conflict { .. })
            | PublishError::Apply(ApplyError::Stale { .. })
            | PublishError::Apply(ApplyError::Store(StoreError::Conflict { .. }))
    )
}

fn commit_message(mutation: &ConfigurationMutation, environment: &Environment) -> String {
    let tag = mutation
        .edits()
        .first()
        .map(|e| e.new_value.as_str())
        .unwrap_or("");
    format!(
        "promote({}): pin {} image(s) to {}\n\n{}",
        environment.name,
        mutation.edits().len(),
        tag,
        mutation.summary()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::InMemoryReviews;
    use crate::store::MemoryStore;
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::Path;
    use uplift_core::{MutationEdit, ResourceLimits, ServiceSpec};

    fn auto_env() -> Environment {
        Environment {
            name: "dev".to_string(),
            namespace: "ledger-dev".to_string(),
            sync_policy: SyncPolicy::Auto,
            image_tag_prefix: "main".to_string(),
            replicas: 1,
            resource_limits: ResourceLimits::default(),
            services: vec![ServiceSpec {
                name: "ledger".to_string(),
                repository: "ghcr.io/acme/ledger".to_string(),
            }],
        }
    }

    fn manual_env() -> Environment {
        Environment {
            name: "staging".to_string(),
            namespace: "ledger-staging".to_string(),
            sync_policy: SyncPolicy::Manual {
                required_approvals: 1,
                approver_groups: ["qa-team".to_string()].into_iter().collect(),
            },
            ..auto_env()
        }
    }

    fn dev_mutation(old: &str, new: &str) -> ConfigurationMutation {
        ConfigurationMutation::new(
            "dev",
            "environments/dev",
            vec![MutationEdit {
                file_path: "environments/dev/kustomization.yaml".into(),
                key: "images[ledger].newTag".to_string(),
                old_value: old.to_string(),
                new_value: new.to_string(),
            }],
        )
        .unwrap()
    }

    fn staging_mutation(old: &str, new: &str) -> ConfigurationMutation {
        ConfigurationMutation::new(
            "staging",
            "environments/staging",
            vec![MutationEdit {
                file_path: "environments/staging/kustomization.yaml".into(),
                key: "images[ledger].newTag".to_string(),
                old_value: old.to_string(),
                new_value: new.to_string(),
            }],
        )
        .unwrap()
    }

    fn gate() -> ApprovalGate {
        let mut membership = BTreeMap::new();
        membership.insert(
            "qa-team".to_string(),
            ["alice".to_string()].into_iter().collect::<BTreeSet<_>>(),
        );
        ApprovalGate::new(membership)
    }

    fn publisher(store: Arc<MemoryStore>) -> (ChangePublisher, Arc<InMemoryReviews>) {
        let reviews = Arc::new(InMemoryReviews::new(store.clone()));
        (
            ChangePublisher::new(store, reviews.clone(), gate()),
            reviews,
        )
    }

    fn seed_dev(store: &MemoryStore, tag: &str) {
        store.seed(
            "environments/dev/kustomization.yaml",
            &format!("images:\n- name: ledger\n  newTag: {tag}\n"),
        );
    }

    #[tokio::test]
    async fn auto_environment_commits_directly() {
        let store = Arc::new(MemoryStore::new());
        seed_dev(&store, "main-xyz9990");
        let (publisher, _) = publisher(store.clone());

        let result = publisher
            .publish(&dev_mutation("main-xyz9990", "main-abc1234"), &auto_env())
            .await
            .unwrap();

        assert!(matches!(result, PublishResult::Committed { .. }));
        assert_eq!(store.commit_count(), 1);
        let contents = store
            .read_file(Path::new("environments/dev/kustomization.yaml"))
            .await
            .unwrap();
        assert!(contents.contains("main-abc1234"));
    }

    #[tokio::test]
    async fn identical_mutation_republish_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        seed_dev(&store, "main-xyz9990");
        let (publisher, _) = publisher(store.clone());
        let mutation = dev_mutation("main-xyz9990", "main-abc1234");

        publisher.publish(&mutation, &auto_env()).await.unwrap();
        let second = publisher.publish(&mutation, &auto_env()).await.unwrap();

        assert_eq!(second, PublishResult::AlreadyApplied);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn conflict_is_retried_once_then_succeeds() {
        let store = Arc::new(MemoryStore::new());
        seed_dev(&store, "main-xyz9990");
        store.inject_conflict();
        let (publisher, _) = publisher(store.clone());

        let result = publisher
            .publish(&dev_mutation("main-xyz9990", "main-abc1234"), &auto_env())
            .await
            .unwrap();

        assert!(matches!(result, PublishResult::Committed { .. }));
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn persistent_conflict_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        seed_dev(&store, "main-xyz9990");
        store.inject_conflict();
        store.inject_conflict();
        let (publisher, _) = publisher(store.clone());

        let err = publisher
            .publish(&dev_mutation("main-xyz9990", "main-abc1234"), &auto_env())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Conflict { .. }));
        assert_eq!(err.kind(), uplift_core::ErrorKind::PublishConflict);
    }

    #[tokio::test]
    async fn manual_environment_opens_review() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "environments/staging/kustomization.yaml",
            "images:\n- name: ledger\n  newTag: stg-aaa1111\n",
        );
        let (publisher, reviews) = publisher(store.clone());

        let result = publisher
            .publish(&staging_mutation("stg-aaa1111", "stg-bbb2222"), &manual_env())
            .await
            .unwrap();

        let PublishResult::ReviewOpened { review_id } = result else {
            panic!("expected a review, got {result:?}");
        };
        // Nothing on trunk yet.
        assert_eq!(store.commit_count(), 0);

        // Gate pending without approvals.
        let merged = publisher
            .merge_when_approved(&review_id, &manual_env())
            .await
            .unwrap();
        assert!(merged.is_none());

        // Approved by a qa-team member: merges and lands on trunk.
        reviews.approve(&review_id, "alice").await.unwrap();
        let merged = publisher
            .merge_when_approved(&review_id, &manual_env())
            .await
            .unwrap();
        assert!(merged.is_some());
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn newer_promotion_supersedes_open_review() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "environments/staging/kustomization.yaml",
            "images:\n- name: ledger\n  newTag: stg-aaa1111\n",
        );
        let (publisher, reviews) = publisher(store.clone());

        let first = publisher
            .publish(&staging_mutation("stg-aaa1111", "stg-bbb2222"), &manual_env())
            .await
            .unwrap();
        let second = publisher
            .publish(&staging_mutation("stg-aaa1111", "stg-ccc3333"), &manual_env())
            .await
            .unwrap();

        let (PublishResult::ReviewOpened { review_id: old },
             PublishResult::ReviewOpened { review_id: new }) = (first, second)
        else {
            panic!("expected two reviews");
        };

        let stale = reviews.get(&old).await.unwrap();
        assert_eq!(stale.superseded_by, Some(new.clone()));
        assert!(matches!(
            reviews.merge(&old).await.unwrap_err(),
            crate::error::ReviewError::Superseded { .. }
        ));
    }
}
