//! End-to-end promotion orchestration.

use chrono::Utc;
use std::sync::Arc;

use crate::audit::{AuditSink, PromotionEvent, PromotionEventKind};
use crate::error::EngineError;
use crate::locks::EnvironmentLocks;
use crate::planner::Planner;
use uplift_core::PromotionRequest;
use uplift_publish::{ChangePublisher, ConfigStore, PublishResult, ReviewId};

/// Terminal outcome of a promotion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Committed directly to trunk.
    Committed {
        /// New trunk head.
        sha: String,
    },
    /// Staged behind a review request awaiting approvals.
    ReviewOpened {
        /// The opened review.
        review_id: ReviewId,
    },
    /// The commit was already the environment's desired state. A no-op,
    /// not an error.
    AlreadyPromoted,
}

/// The promotion engine.
///
/// Holds the per-environment locks; one engine instance serves all
/// environments, so construct it once and share it.
pub struct PromotionEngine {
    planner: Planner,
    publisher: ChangePublisher,
    store: Arc<dyn ConfigStore>,
    locks: EnvironmentLocks,
    audit: Arc<dyn AuditSink>,
}

impl PromotionEngine {
    /// Build an engine.
    pub fn new(
        planner: Planner,
        publisher: ChangePublisher,
        store: Arc<dyn ConfigStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            planner,
            publisher,
            store,
            locks: EnvironmentLocks::new(),
            audit,
        }
    }

    /// The publisher, for approval checks and gated merges.
    pub fn publisher(&self) -> &ChangePublisher {
        &self.publisher
    }

    /// The planner, for environment lookups.
    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    fn record(&self, request: &PromotionRequest, kind: PromotionEventKind, detail: String) {
        self.audit.record(PromotionEvent {
            request_id: request.id,
            environment: request.target_environment.clone(),
            source_commit: request.source_commit.clone(),
            kind,
            detail,
            occurred_at: Utc::now(),
        });
    }

    /// Run a promotion request to a terminal outcome.
    ///
    /// The environment's lock is held from planning until the outcome is
    /// known and is released on every exit path; failures never leave the
    /// environment locked against future promotions.
    pub async fn promote(&self, request: &PromotionRequest) -> Result<Outcome, EngineError> {
        // Validate before locking so an unknown environment never touches
        // the lock registry.
        self.planner.environment(&request.target_environment)?;

        let _guard = self.locks.acquire(&request.target_environment).await;
        let result = self.promote_locked(request).await;
        if let Err(err) = &result {
            self.record(request, PromotionEventKind::Failed, err.to_string());
            tracing::warn!(
                environment = request.target_environment,
                commit = request.source_commit,
                kind = %err.kind(),
                error = %err,
                "promotion failed"
            );
        }
        result
    }

    async fn promote_locked(&self, request: &PromotionRequest) -> Result<Outcome, EngineError> {
        let plan = self
            .planner
            .plan(&request.source_commit, &request.target_environment)
            .await?;
        self.record(
            request,
            PromotionEventKind::Planned,
            format!("tag {}", plan.target_tag),
        );

        if plan.mutation.is_empty() {
            self.record(request, PromotionEventKind::AlreadyPromoted, String::new());
            return Ok(Outcome::AlreadyPromoted);
        }

        let environment = self.planner.environment(&plan.environment)?;
        let outcome = match self.publisher.publish(&plan.mutation, environment).await? {
            PublishResult::Committed { sha } => {
                self.record(request, PromotionEventKind::Committed, sha.clone());
                Outcome::Committed { sha }
            }
            PublishResult::ReviewOpened { review_id } => {
                self.record(
                    request,
                    PromotionEventKind::ReviewOpened,
                    review_id.to_string(),
                );
                Outcome::ReviewOpened { review_id }
            }
            PublishResult::AlreadyApplied => {
                self.record(request, PromotionEventKind::AlreadyPromoted, String::new());
                Outcome::AlreadyPromoted
            }
        };
        Ok(outcome)
    }

    /// Revert the most recent promotion commit touching an environment.
    ///
    /// This is the explicit compensating action for a published promotion;
    /// nothing is reverted automatically. Serialized under the same
    /// per-environment lock as promotions.
    pub async fn rollback(
        &self,
        environment: &str,
        requested_by: &str,
    ) -> Result<String, EngineError> {
        let env = self.planner.environment(environment)?;
        let overlay_root = env.overlay_root();
        let name = env.name.clone();

        let _guard = self.locks.acquire(&name).await;
        let message = format!("rollback({name}): revert last promotion, requested by {requested_by}");
        let sha = self
            .store
            .revert_last_touching(&overlay_root, &message)
            .await?;
        self.audit.record(PromotionEvent {
            request_id: uuid::Uuid::new_v4(),
            environment: name.clone(),
            source_commit: String::new(),
            kind: PromotionEventKind::RolledBack,
            detail: sha.clone(),
            occurred_at: Utc::now(),
        });
        tracing::info!(environment = name, sha = %sha, "rolled back last promotion");
        Ok(sha)
    }
}
