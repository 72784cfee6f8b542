//! Promotion audit events.
//!
//! The durable audit trail is the commit history itself; these events are
//! the operational record emitted while getting there.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// What happened to a promotion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionEventKind {
    /// A mutation was planned.
    Planned,
    /// The mutation was committed to trunk.
    Committed,
    /// The mutation was staged behind a review.
    ReviewOpened,
    /// The commit was already the environment's desired state.
    AlreadyPromoted,
    /// The promotion failed.
    Failed,
    /// A previously published promotion was reverted.
    RolledBack,
}

impl std::fmt::Display for PromotionEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planned => "PLANNED",
            Self::Committed => "COMMITTED",
            Self::ReviewOpened => "REVIEW_OPENED",
            Self::AlreadyPromoted => "ALREADY_PROMOTED",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
        };
        f.write_str(s)
    }
}

/// An audit event for one promotion step.
#[derive(Debug, Clone)]
pub struct PromotionEvent {
    /// Originating request id.
    pub request_id: Uuid,
    /// Target environment.
    pub environment: String,
    /// Source commit being promoted.
    pub source_commit: String,
    /// What happened.
    pub kind: PromotionEventKind,
    /// Outcome detail: commit SHA, review id, or error text.
    pub detail: String,
    /// When the event was recorded.
    pub occurred_at: DateTime<Utc>,
}

/// Sink for promotion audit events.
pub trait AuditSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: PromotionEvent);
}

/// Emits events through the tracing subscriber.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: PromotionEvent) {
        tracing::info!(
            request = %event.request_id,
            environment = %event.environment,
            commit = %event.source_commit,
            kind = %event.kind,
            detail = %event.detail,
            "promotion event"
        );
    }
}

/// Collects events in memory; used by the test suites.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<PromotionEvent>>>,
}

impl MemoryAuditSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events.
    pub fn events(&self) -> Vec<PromotionEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: PromotionEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
