//! End-to-end promotion scenarios against in-memory collaborators.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uplift_core::config::RetryConfig;
use uplift_core::{
    Environment, EnvironmentRegistry, PromotionRequest, ResourceLimits, ServiceSpec, SyncPolicy,
};
use uplift_engine::{MemoryAuditSink, Outcome, Planner, PromotionEngine};
use uplift_publish::{
    ApprovalGate, ChangePublisher, ConfigStore, InMemoryReviews, MemoryStore, ReviewSystem,
};
use uplift_registry::{ImageResolver, RegistryClient, RegistryError, StaticRegistryClient};
use uplift_sync::{StoreSyncController, SyncController};

fn dev() -> Environment {
    Environment {
        name: "dev".to_string(),
        namespace: "ledger-dev".to_string(),
        sync_policy: SyncPolicy::Auto,
        image_tag_prefix: "main".to_string(),
        replicas: 1,
        resource_limits: ResourceLimits::default(),
        services: vec![
            ServiceSpec {
                name: "ledger".to_string(),
                repository: "ghcr.io/acme/ledger".to_string(),
            },
            ServiceSpec {
                name: "ledger-backoffice".to_string(),
                repository: "ghcr.io/acme/ledger-backoffice".to_string(),
            },
        ],
    }
}

fn qa() -> Environment {
    Environment {
        name: "qa".to_string(),
        namespace: "ledger-qa".to_string(),
        image_tag_prefix: "qa".to_string(),
        ..dev()
    }
}

fn staging() -> Environment {
    Environment {
        name: "staging".to_string(),
        namespace: "ledger-staging".to_string(),
        sync_policy: SyncPolicy::Manual {
            required_approvals: 1,
            approver_groups: ["qa-team".to_string()].into_iter().collect(),
        },
        image_tag_prefix: "stg".to_string(),
        ..dev()
    }
}

fn seed_overlay(store: &MemoryStore, env: &str, tag: &str) {
    store.seed(
        format!("environments/{env}/kustomization.yaml"),
        &format!(
            "images:\n- name: ledger\n  newTag: {tag}\n- name: ledger-backoffice\n  newTag: {tag}\n"
        ),
    );
}

fn membership() -> BTreeMap<String, BTreeSet<String>> {
    let mut m = BTreeMap::new();
    m.insert(
        "qa-team".to_string(),
        ["alice".to_string()].into_iter().collect(),
    );
    m
}

struct Harness {
    engine: PromotionEngine,
    store: Arc<MemoryStore>,
    reviews: Arc<InMemoryReviews>,
    audit: Arc<MemoryAuditSink>,
}

fn harness(client: Arc<dyn RegistryClient>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    seed_overlay(&store, "dev", "main-xyz9990");
    seed_overlay(&store, "qa", "qa-xyz9990");
    seed_overlay(&store, "staging", "stg-xyz9990");

    let resolver = Arc::new(ImageResolver::new(
        client,
        RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
        },
    ));
    let registry = EnvironmentRegistry::new(vec![dev(), qa(), staging()]).unwrap();
    let planner = Planner::new(registry, resolver, store.clone());
    let reviews = Arc::new(InMemoryReviews::new(store.clone()));
    let publisher = ChangePublisher::new(
        store.clone(),
        reviews.clone(),
        ApprovalGate::new(membership()),
    );
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = PromotionEngine::new(planner, publisher, store.clone(), audit.clone());
    Harness {
        engine,
        store,
        reviews,
        audit,
    }
}

fn full_registry() -> Arc<StaticRegistryClient> {
    let client = Arc::new(StaticRegistryClient::new());
    for prefix in ["main", "qa", "stg"] {
        client.push("ghcr.io/acme/ledger", &format!("{prefix}-abc1234"));
        client.push(
            "ghcr.io/acme/ledger-backoffice",
            &format!("{prefix}-abc1234"),
        );
    }
    client
}

async fn overlay(store: &MemoryStore, env: &str) -> String {
    store
        .read_file(Path::new(&format!("environments/{env}/kustomization.yaml")))
        .await
        .unwrap()
}

#[tokio::test]
async fn dev_promotion_commits_directly() {
    let h = harness(full_registry());
    let request = PromotionRequest::new("abc1234deadbeef", "dev", "ci");

    let outcome = h.engine.promote(&request).await.unwrap();

    let Outcome::Committed { sha } = outcome else {
        panic!("expected a direct commit, got {outcome:?}");
    };
    assert_eq!(h.store.head().await.unwrap(), sha);
    let contents = overlay(&h.store, "dev").await;
    assert!(contents.contains("main-abc1234"));
    assert!(!contents.contains("main-xyz9990"));
}

#[tokio::test]
async fn second_promotion_of_same_commit_is_already_promoted() {
    let h = harness(full_registry());
    let first = PromotionRequest::new("abc1234deadbeef", "dev", "ci");
    let second = PromotionRequest::new("abc1234deadbeef", "dev", "ci");

    assert!(matches!(
        h.engine.promote(&first).await.unwrap(),
        Outcome::Committed { .. }
    ));
    assert_eq!(
        h.engine.promote(&second).await.unwrap(),
        Outcome::AlreadyPromoted
    );
    // No duplicate commit.
    assert_eq!(h.store.commit_count(), 1);
}

#[tokio::test]
async fn missing_image_leaves_every_service_unchanged() {
    // qa-abc1234 exists for ledger but not for ledger-backoffice.
    let client = Arc::new(StaticRegistryClient::new());
    client.push("ghcr.io/acme/ledger", "qa-abc1234");
    let h = harness(client);

    let request = PromotionRequest::new("abc1234deadbeef", "qa", "ci");
    let err = h.engine.promote(&request).await.unwrap_err();

    assert_eq!(err.kind(), uplift_core::ErrorKind::ImageNotFound);
    // Atomicity: the ledger tag must not have moved either.
    let contents = overlay(&h.store, "qa").await;
    assert!(contents.contains("qa-xyz9990"));
    assert!(!contents.contains("qa-abc1234"));
    assert_eq!(h.store.commit_count(), 0);
}

#[tokio::test]
async fn staging_promotion_never_touches_other_overlays() {
    let h = harness(full_registry());
    let before_dev = overlay(&h.store, "dev").await;
    let before_qa = overlay(&h.store, "qa").await;

    let request = PromotionRequest::new("abc1234deadbeef", "staging", "release-bot");
    let outcome = h.engine.promote(&request).await.unwrap();
    assert!(matches!(outcome, Outcome::ReviewOpened { .. }));

    assert_eq!(overlay(&h.store, "dev").await, before_dev);
    assert_eq!(overlay(&h.store, "qa").await, before_qa);
}

#[tokio::test]
async fn unknown_environment_is_fatal() {
    let h = harness(full_registry());
    let request = PromotionRequest::new("abc1234deadbeef", "prod", "ci");
    let err = h.engine.promote(&request).await.unwrap_err();
    assert_eq!(err.kind(), uplift_core::ErrorKind::UnknownEnvironment);
}

#[tokio::test]
async fn gated_mutation_reaches_desired_state_only_after_merge() {
    let h = harness(full_registry());
    let controller = StoreSyncController::new(h.store.clone());
    let head_before = h.store.head().await.unwrap();

    let request = PromotionRequest::new("abc1234deadbeef", "staging", "release-bot");
    let Outcome::ReviewOpened { review_id } = h.engine.promote(&request).await.unwrap() else {
        panic!("expected a review");
    };

    // Desired revision unchanged while the review is pending.
    let state = controller.get("staging").await.unwrap();
    assert_eq!(state.desired_revision, head_before);

    // Gate pending: merge refused.
    let merged = h
        .engine
        .publisher()
        .merge_when_approved(&review_id, &staging())
        .await
        .unwrap();
    assert!(merged.is_none());
    assert_eq!(
        controller.get("staging").await.unwrap().desired_revision,
        head_before
    );

    // Approve and merge: desired revision moves.
    h.reviews.approve(&review_id, "alice").await.unwrap();
    let merged = h
        .engine
        .publisher()
        .merge_when_approved(&review_id, &staging())
        .await
        .unwrap()
        .expect("gate satisfied");
    assert_eq!(
        controller.get("staging").await.unwrap().desired_revision,
        merged
    );
    assert!(overlay(&h.store, "staging").await.contains("stg-abc1234"));
}

/// Registry client that stamps resolution windows into a shared log.
struct LoggingClient {
    inner: Arc<StaticRegistryClient>,
    log: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

#[async_trait]
impl RegistryClient for LoggingClient {
    async fn manifest_exists(&self, repository: &str, tag: &str) -> Result<bool, RegistryError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("start {tag} {repository}"));
        tokio::time::sleep(self.delay).await;
        let result = self.inner.manifest_exists(repository, tag).await;
        self.log
            .lock()
            .unwrap()
            .push(format!("end {tag} {repository}"));
        result
    }

    async fn list_tags(&self, repository: &str) -> Result<BTreeSet<String>, RegistryError> {
        self.inner.list_tags(repository).await
    }
}

#[tokio::test]
async fn same_environment_promotions_never_interleave() {
    let inner = full_registry();
    inner.push("ghcr.io/acme/ledger", "main-def5678");
    inner.push("ghcr.io/acme/ledger-backoffice", "main-def5678");
    let log = Arc::new(Mutex::new(Vec::new()));
    let client = Arc::new(LoggingClient {
        inner,
        log: log.clone(),
        delay: Duration::from_millis(25),
    });
    let h = Arc::new(harness(client));

    let first = PromotionRequest::new("abc1234deadbeef", "dev", "ci");
    let second = PromotionRequest::new("def5678deadbeef", "dev", "ci");

    let h1 = h.clone();
    let t1 = tokio::spawn(async move { h1.engine.promote(&first).await });
    // Give the first promotion a head start into its resolution fan-out.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let h2 = h.clone();
    let t2 = tokio::spawn(async move { h2.engine.promote(&second).await });

    t1.await.unwrap().unwrap();
    t2.await.unwrap().unwrap();

    // Every event of the first plan precedes every event of the second:
    // the per-environment lock forbids interleaved planning.
    let log = log.lock().unwrap();
    let last_first = log
        .iter()
        .rposition(|l| l.contains("main-abc1234"))
        .unwrap();
    let first_second = log
        .iter()
        .position(|l| l.contains("main-def5678"))
        .unwrap();
    assert!(
        last_first < first_second,
        "interleaved resolution windows: {log:?}"
    );

    // Both landed, in order.
    assert_eq!(h.store.commit_count(), 2);
    assert!(overlay(&h.store, "dev").await.contains("main-def5678"));
}

#[tokio::test]
async fn different_environments_promote_in_parallel() {
    let h = Arc::new(harness(full_registry()));
    let dev_req = PromotionRequest::new("abc1234deadbeef", "dev", "ci");
    let qa_req = PromotionRequest::new("abc1234deadbeef", "qa", "ci");

    let h1 = h.clone();
    let h2 = h.clone();
    let (dev_out, qa_out) = tokio::join!(
        async move { h1.engine.promote(&dev_req).await },
        async move { h2.engine.promote(&qa_req).await },
    );

    assert!(matches!(dev_out.unwrap(), Outcome::Committed { .. }));
    assert!(matches!(qa_out.unwrap(), Outcome::Committed { .. }));
    assert!(overlay(&h.store, "dev").await.contains("main-abc1234"));
    assert!(overlay(&h.store, "qa").await.contains("qa-abc1234"));
}

#[tokio::test]
async fn failed_promotion_releases_the_lock() {
    let client = Arc::new(StaticRegistryClient::new());
    let h = harness(client.clone());

    // First attempt fails: no images pushed yet.
    let request = PromotionRequest::new("abc1234deadbeef", "dev", "ci");
    h.engine.promote(&request).await.unwrap_err();

    // Push the images; the environment must not be wedged.
    client.push("ghcr.io/acme/ledger", "main-abc1234");
    client.push("ghcr.io/acme/ledger-backoffice", "main-abc1234");
    let retry = PromotionRequest::new("abc1234deadbeef", "dev", "ci");
    assert!(matches!(
        h.engine.promote(&retry).await.unwrap(),
        Outcome::Committed { .. }
    ));
}

#[tokio::test]
async fn rollback_restores_previous_tags() {
    let h = harness(full_registry());
    let request = PromotionRequest::new("abc1234deadbeef", "dev", "ci");
    h.engine.promote(&request).await.unwrap();
    assert!(overlay(&h.store, "dev").await.contains("main-abc1234"));

    h.engine.rollback("dev", "oncall").await.unwrap();
    let contents = overlay(&h.store, "dev").await;
    assert!(contents.contains("main-xyz9990"));
    assert!(!contents.contains("main-abc1234"));
}

#[tokio::test]
async fn audit_trail_records_the_outcome() {
    let h = harness(full_registry());
    let request = PromotionRequest::new("abc1234deadbeef", "dev", "ci");
    h.engine.promote(&request).await.unwrap();

    let events = h.audit.events();
    assert!(events
        .iter()
        .any(|e| e.kind == uplift_engine::PromotionEventKind::Planned));
    assert!(events
        .iter()
        .any(|e| e.kind == uplift_engine::PromotionEventKind::Committed));
    assert!(events.iter().all(|e| e.request_id == request.id));
}
