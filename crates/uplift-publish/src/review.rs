//! Review requests for manual-sync environments.
//!
//! A review request carries a named mutation as a diff and walks the
//! lifecycle `Open -> Approved -> Merged | Rejected | Closed`. `Merged` is
//! terminal success; `Rejected` and `Closed` are terminal failures that
//! require a fresh promotion request. A review superseded by a newer
//! promotion for the same environment must never merge, even if approved.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::error::ReviewError;
use crate::overlay::{self, Applied};
use crate::store::ConfigStore;
use uplift_core::ConfigurationMutation;

/// Identifier of a review request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewId(pub String);

impl std::fmt::Display for ReviewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a review request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Awaiting approvals.
    Open,
    /// Approval gate satisfied; ready to merge.
    Approved,
    /// Merged into trunk. Terminal success.
    Merged,
    /// Rejected by a reviewer. Terminal failure.
    Rejected,
    /// Closed without merging. Terminal failure.
    Closed,
}

impl ReviewStatus {
    /// Whether the review reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged | Self::Rejected | Self::Closed)
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Approved => "approved",
            Self::Merged => "merged",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A review request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    /// Review identifier (PR number on a forge, UUID in memory).
    pub id: ReviewId,
    /// Environment the carried mutation targets.
    pub environment: String,
    /// Review title.
    pub title: String,
    /// The carried mutation. Absent when the backing forge stores the diff
    /// itself (the branch holds the change).
    pub mutation: Option<ConfigurationMutation>,
    /// Current lifecycle state.
    pub status: ReviewStatus,
    /// Logins that have approved so far.
    pub approvers: BTreeSet<String>,
    /// When the review was opened.
    pub created_at: DateTime<Utc>,
    /// Set when a newer promotion replaced this review.
    pub superseded_by: Option<ReviewId>,
    /// Trunk SHA of the merge commit, once merged.
    pub merged_sha: Option<String>,
}

/// Create, query, and resolve review requests.
#[async_trait]
pub trait ReviewSystem: Send + Sync {
    /// Open a review carrying a mutation; returns its id.
    async fn open(
        &self,
        environment: &str,
        title: &str,
        mutation: &ConfigurationMutation,
    ) -> Result<ReviewId, ReviewError>;

    /// Fetch a review's current state.
    async fn get(&self, id: &ReviewId) -> Result<Review, ReviewError>;

    /// Record an approval from a reviewer.
    async fn approve(&self, id: &ReviewId, approver: &str) -> Result<(), ReviewError>;

    /// Reject the review. Terminal.
    async fn reject(&self, id: &ReviewId, by: &str) -> Result<(), ReviewError>;

    /// Merge the review into trunk, returning the merge commit SHA.
    ///
    /// Callers must have satisfied the approval gate first; implementations
    /// additionally refuse superseded and terminal reviews.
    async fn merge(&self, id: &ReviewId) -> Result<String, ReviewError>;

    /// Close the review without merging. Terminal.
    async fn close(&self, id: &ReviewId) -> Result<(), ReviewError>;

    /// Mark a review as superseded by a newer one.
    async fn supersede(&self, id: &ReviewId, by: &ReviewId) -> Result<(), ReviewError>;

    /// All non-terminal reviews targeting an environment.
    async fn open_reviews_for(&self, environment: &str) -> Result<Vec<Review>, ReviewError>;
}

/// In-process review ledger.
///
/// Keeps reviews in memory and applies the carried mutation to the config
/// store on merge, so trunk only reflects a gated change once it is merged.
pub struct InMemoryReviews {
    store: Arc<dyn ConfigStore>,
    reviews: RwLock<HashMap<ReviewId, Review>>,
}

impl InMemoryReviews {
    /// Create a ledger applying merges to the given store.
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            reviews: RwLock::new(HashMap::new()),
        }
    }

    fn with_review<T>(
        &self,
        id: &ReviewId,
        f: impl FnOnce(&mut Review) -> Result<T, ReviewError>,
    ) -> Result<T, ReviewError> {
        let mut reviews = self.reviews.write().unwrap_or_else(|e| e.into_inner());
        let review = reviews.get_mut(id).ok_or_else(|| ReviewError::NotFound {
            id: id.to_string(),
        })?;
        f(review)
    }
}

#[async_trait]
impl ReviewSystem for InMemoryReviews {
    async fn open(
        &self,
        environment: &str,
        title: &str,
        mutation: &ConfigurationMutation,
    ) -> Result<ReviewId, ReviewError> {
        let id = ReviewId(Uuid::new_v4().to_string());
        let review = Review {
            id: id.clone(),
            environment: environment.to_string(),
            title: title.to_string(),
            mutation: Some(mutation.clone()),
            status: ReviewStatus::Open,
            approvers: BTreeSet::new(),
            created_at: Utc::now(),
            superseded_by: None,
            merged_sha: None,
        };
        let mut reviews = self.reviews.write().unwrap_or_else(|e| e.into_inner());
        reviews.insert(id.clone(), review);
        tracing::info!(review = %id, environment, "opened review request");
        Ok(id)
    }

    async fn get(&self, id: &ReviewId) -> Result<Review, ReviewError> {
        let reviews = self.reviews.read().unwrap_or_else(|e| e.into_inner());
        reviews.get(id).cloned().ok_or_else(|| ReviewError::NotFound {
            id: id.to_string(),
        })
    }

    async fn approve(&self, id: &ReviewId, approver: &str) -> Result<(), ReviewError> {
        self.with_review(id, |review| {
            if review.status.is_terminal() {
                return Err(ReviewError::InvalidState {
                    id: id.to_string(),
                    status: review.status.to_string(),
                    operation: "approve".to_string(),
                });
            }
            review.approvers.insert(approver.to_string());
            Ok(())
        })
    }

    async fn reject(&self, id: &ReviewId, by: &str) -> Result<(), ReviewError> {
        self.with_review(id, |review| {
            if review.status.is_terminal() {
                return Err(ReviewError::InvalidState {
                    id: id.to_string(),
                    status: review.status.to_string(),
                    operation: "reject".to_string(),
                });
            }
            review.status = ReviewStatus::Rejected;
            tracing::info!(review = %id, by, "review rejected");
            Ok(())
        })
    }

    async fn merge(&self, id: &ReviewId) -> Result<String, ReviewError> {
        // Validate state and take the mutation out under the lock, then
        // apply it without holding the lock.
        let (mutation, title) = self.with_review(id, |review| {
            if let Some(by) = &review.superseded_by {
                return Err(ReviewError::Superseded {
                    id: id.to_string(),
                    superseded_by: by.to_string(),
                });
            }
            if review.status.is_terminal() {
                return Err(ReviewError::InvalidState {
                    id: id.to_string(),
                    status: review.status.to_string(),
                    operation: "merge".to_string(),
                });
            }
            review.status = ReviewStatus::Approved;
            let mutation = review.mutation.clone().ok_or_else(|| {
                ReviewError::Forge("review carries no mutation".to_string())
            })?;
            Ok((mutation, review.title.clone()))
        })?;

        let sha = match overlay::apply_mutation(self.store.as_ref(), &mutation).await? {
            Applied::Changed(files) => self.store.commit(&title, &files).await?,
            // Already in trunk (identical mutation merged earlier); no-op.
            Applied::Noop => self.store.head().await?,
        };

        self.with_review(id, |review| {
            review.status = ReviewStatus::Merged;
            review.merged_sha = Some(sha.clone());
            Ok(())
        })?;
        tracing::info!(review = %id, sha = %sha, "review merged");
        Ok(sha)
    }

    async fn close(&self, id: &ReviewId) -> Result<(), ReviewError> {
        self.with_review(id, |review| {
            if review.status == ReviewStatus::Merged {
                return Err(ReviewError::InvalidState {
                    id: id.to_string(),
                    status: review.status.to_string(),
                    operation: "close".to_string(),
                });
            }
            review.status = ReviewStatus::Closed;
            Ok(())
        })
    }

    async fn supersede(&self, id: &ReviewId, by: &ReviewId) -> Result<(), ReviewError> {
        self.with_review(id, |review| {
            review.superseded_by = Some(by.clone());
            if !review.status.is_terminal() {
                review.status = ReviewStatus::Closed;
            }
            Ok(())
        })
    }

    async fn open_reviews_for(&self, environment: &str) -> Result<Vec<Review>, ReviewError> {
        let reviews = self.reviews.read().unwrap_or_else(|e| e.into_inner());
        Ok(reviews
            .values()
            .filter(|r| r.environment == environment && !r.status.is_terminal())
            .cloned()
            .collect())
    }
}

/// GitHub-backed review system.
///
/// The mutation is committed to a promotion branch and opened as a pull
/// request; approvals come from PR reviews. Approver-group membership is
/// resolved by the approval gate, not here.
pub struct GitHubReviews {
    http: reqwest::Client,
    api_url: String,
    repository: String,
    token: Option<String>,
    store: Arc<dyn ConfigStore>,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    title: String,
    state: String,
    merged: Option<bool>,
    merge_commit_sha: Option<String>,
    created_at: DateTime<Utc>,
    head: PullHead,
}

#[derive(Debug, Deserialize)]
struct PullHead {
    #[serde(rename = "ref")]
    branch: String,
}

#[derive(Debug, Deserialize)]
struct PullReviewResponse {
    state: String,
    user: PullUser,
}

#[derive(Debug, Deserialize)]
struct PullUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    sha: String,
}

impl GitHubReviews {
    /// Build a client from forge configuration.
    pub fn new(
        api_url: impl Into<String>,
        repository: impl Into<String>,
        token: Option<String>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            repository: repository.into(),
            token,
            store,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{path}",
            self.api_url.trim_end_matches('/'),
            self.repository
        )
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "uplift");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ReviewError> {
        let response = req
            .send()
            .await
            .map_err(|e| ReviewError::Forge(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReviewError::Forge(format!("HTTP {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| ReviewError::Forge(e.to_string()))
    }

    fn branch_environment(branch: &str) -> String {
        // Promotion branches are named `uplift/<environment>/<tag>`.
        branch
            .strip_prefix("uplift/")
            .and_then(|rest| rest.split('/').next())
            .unwrap_or(branch)
            .to_string()
    }

    fn review_from_pull(pull: PullResponse, approvers: BTreeSet<String>) -> Review {
        let status = match (pull.state.as_str(), pull.merged.unwrap_or(false)) {
            (_, true) => ReviewStatus::Merged,
            ("closed", false) => ReviewStatus::Closed,
            _ => ReviewStatus::Open,
        };
        Review {
            id: ReviewId(pull.number.to_string()),
            environment: Self::branch_environment(&pull.head.branch),
            title: pull.title,
            mutation: None,
            status,
            approvers,
            created_at: pull.created_at,
            superseded_by: None,
            merged_sha: pull.merge_commit_sha,
        }
    }

    fn pull_number(id: &ReviewId) -> Result<u64, ReviewError> {
        id.0.parse().map_err(|_| ReviewError::NotFound {
            id: id.to_string(),
        })
    }
}

#[async_trait]
impl ReviewSystem for GitHubReviews {
    async fn open(
        &self,
        environment: &str,
        title: &str,
        mutation: &ConfigurationMutation,
    ) -> Result<ReviewId, ReviewError> {
        let tag = mutation
            .edits()
            .first()
            .map(|e| e.new_value.clone())
            .unwrap_or_else(|| "empty".to_string());
        let branch = format!("uplift/{environment}/{tag}");

        let files = match overlay::apply_mutation(self.store.as_ref(), mutation).await? {
            Applied::Changed(files) => files,
            Applied::Noop => Vec::new(),
        };
        self.store.commit_to_branch(&branch, title, &files).await?;

        let pull: PullResponse = self
            .send(self.request(reqwest::Method::POST, self.url("pulls")).json(
                &serde_json::json!({
                    "title": title,
                    "head": branch,
                    "base": "main",
                    "body": mutation.summary(),
                }),
            ))
            .await?;
        Ok(ReviewId(pull.number.to_string()))
    }

    async fn get(&self, id: &ReviewId) -> Result<Review, ReviewError> {
        let number = Self::pull_number(id)?;
        let pull: PullResponse = self
            .send(self.request(reqwest::Method::GET, self.url(&format!("pulls/{number}"))))
            .await?;
        let reviews: Vec<PullReviewResponse> = self
            .send(self.request(
                reqwest::Method::GET,
                self.url(&format!("pulls/{number}/reviews")),
            ))
            .await?;
        let approvers = reviews
            .into_iter()
            .filter(|r| r.state == "APPROVED")
            .map(|r| r.user.login)
            .collect();
        Ok(Self::review_from_pull(pull, approvers))
    }

    async fn approve(&self, id: &ReviewId, _approver: &str) -> Result<(), ReviewError> {
        // Approvals are submitted through the forge UI, not through us.
        Err(ReviewError::InvalidState {
            id: id.to_string(),
            status: "forge-managed".to_string(),
            operation: "approve".to_string(),
        })
    }

    async fn reject(&self, id: &ReviewId, _by: &str) -> Result<(), ReviewError> {
        self.close(id).await
    }

    async fn merge(&self, id: &ReviewId) -> Result<String, ReviewError> {
        let number = Self::pull_number(id)?;
        let merged: MergeResponse = self
            .send(
                self.request(
                    reqwest::Method::PUT,
                    self.url(&format!("pulls/{number}/merge")),
                )
                .json(&serde_json::json!({ "merge_method": "squash" })),
            )
            .await?;
        Ok(merged.sha)
    }

    async fn close(&self, id: &ReviewId) -> Result<(), ReviewError> {
        let number = Self::pull_number(id)?;
        let _: PullResponse = self
            .send(
                self.request(
                    reqwest::Method::PATCH,
                    self.url(&format!("pulls/{number}")),
                )
                .json(&serde_json::json!({ "state": "closed" })),
            )
            .await?;
        Ok(())
    }

    async fn supersede(&self, id: &ReviewId, by: &ReviewId) -> Result<(), ReviewError> {
        let number = Self::pull_number(id)?;
        let _: serde_json::Value = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    self.url(&format!("issues/{number}/comments")),
                )
                .json(&serde_json::json!({
                    "body": format!("Superseded by review {by}; closing."),
                })),
            )
            .await?;
        self.close(id).await
    }

    async fn open_reviews_for(&self, environment: &str) -> Result<Vec<Review>, ReviewError> {
        let pulls: Vec<PullResponse> = self
            .send(self.request(
                reqwest::Method::GET,
                self.url("pulls?state=open&per_page=100"),
            ))
            .await?;
        Ok(pulls
            .into_iter()
            .filter(|p| Self::branch_environment(&p.head.branch) == environment)
            .map(|p| Self::review_from_pull(p, BTreeSet::new()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use uplift_core::MutationEdit;

    fn mutation() -> ConfigurationMutation {
        ConfigurationMutation::new(
            "staging",
            "environments/staging",
            vec![MutationEdit {
                file_path: "environments/staging/kustomization.yaml".into(),
                key: "images[ledger].newTag".to_string(),
                old_value: "stg-aaa1111".to_string(),
                new_value: "stg-bbb2222".to_string(),
            }],
        )
        .unwrap()
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "environments/staging/kustomization.yaml",
            "images:\n- name: ledger\n  newTag: stg-aaa1111\n",
        );
        store
    }

    #[tokio::test]
    async fn review_walks_open_to_merged() {
        let store = seeded_store();
        let reviews = InMemoryReviews::new(store.clone());

        let id = reviews
            .open("staging", "promote staging", &mutation())
            .await
            .unwrap();
        assert_eq!(reviews.get(&id).await.unwrap().status, ReviewStatus::Open);

        reviews.approve(&id, "alice").await.unwrap();
        let sha = reviews.merge(&id).await.unwrap();

        let review = reviews.get(&id).await.unwrap();
        assert_eq!(review.status, ReviewStatus::Merged);
        assert_eq!(review.merged_sha.as_deref(), Some(sha.as_str()));

        let contents = store
            .read_file(std::path::Path::new("environments/staging/kustomization.yaml"))
            .await
            .unwrap();
        assert!(contents.contains("stg-bbb2222"));
    }

    #[tokio::test]
    async fn trunk_untouched_until_merge() {
        let store = seeded_store();
        let reviews = InMemoryReviews::new(store.clone());

        reviews
            .open("staging", "promote staging", &mutation())
            .await
            .unwrap();

        let contents = store
            .read_file(std::path::Path::new("environments/staging/kustomization.yaml"))
            .await
            .unwrap();
        assert!(contents.contains("stg-aaa1111"));
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn superseded_review_refuses_merge() {
        let store = seeded_store();
        let reviews = InMemoryReviews::new(store.clone());

        let old = reviews
            .open("staging", "promote staging old", &mutation())
            .await
            .unwrap();
        let new = reviews
            .open("staging", "promote staging new", &mutation())
            .await
            .unwrap();
        reviews.supersede(&old, &new).await.unwrap();

        let err = reviews.merge(&old).await.unwrap_err();
        assert!(matches!(err, ReviewError::Superseded { .. }));
    }

    #[tokio::test]
    async fn terminal_reviews_reject_further_transitions() {
        let store = seeded_store();
        let reviews = InMemoryReviews::new(store.clone());

        let id = reviews
            .open("staging", "promote staging", &mutation())
            .await
            .unwrap();
        reviews.reject(&id, "carol").await.unwrap();

        assert!(matches!(
            reviews.approve(&id, "alice").await.unwrap_err(),
            ReviewError::InvalidState { .. }
        ));
        assert!(matches!(
            reviews.merge(&id).await.unwrap_err(),
            ReviewError::InvalidState { .. }
        ));
    }
}
