//! Sync controller interface.
//!
//! The reconciliation controller itself is external (ArgoCD): it watches the
//! versioned configuration tree, diffs it against live cluster state, and
//! applies changes automatically or on explicit command depending on the
//! environment. This crate only queries it and requests syncs; it never
//! writes cluster state.

pub mod controller;
pub mod error;

pub use controller::{ArgoCdClient, ResourceDiff, StoreSyncController, SyncController};
pub use error::SyncError;

use serde::{Deserialize, Serialize};

/// Reconciliation status of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Live state matches the desired revision.
    Synced,
    /// Desired state has moved ahead of (or drifted from) live state.
    OutOfSync,
    /// Resources are unhealthy.
    Degraded,
    /// A sync or rollout is in flight.
    Progressing,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Synced => "Synced",
            Self::OutOfSync => "OutOfSync",
            Self::Degraded => "Degraded",
            Self::Progressing => "Progressing",
        };
        f.write_str(s)
    }
}

/// Per-environment reconciliation state, owned by the sync controller.
///
/// The promotion engine only ever reads this; it changes `desired_revision`
/// indirectly by committing to the configuration tree, never by writing
/// here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Revision of the configuration tree the controller is converging to.
    pub desired_revision: String,
    /// Revision currently applied to the cluster.
    pub live_revision: String,
    /// Reconciliation status.
    pub status: SyncStatus,
}
