//! Change publishing for the versioned configuration tree.
//!
//! A planned [`ConfigurationMutation`](uplift_core::ConfigurationMutation)
//! becomes durable here: committed directly to trunk for auto-sync
//! environments, or staged behind a review request for manual-sync ones.
//! The crate also owns the approval gate that releases gated reviews.

pub mod approval;
pub mod error;
pub mod overlay;
pub mod publisher;
pub mod review;
pub mod store;

pub use approval::{ApprovalCheck, ApprovalGate};
pub use error::{ApplyError, OverlayError, PublishError, ReviewError, StoreError};
pub use overlay::{apply_mutation, Applied, Overlay};
pub use publisher::{ChangePublisher, PublishResult};
pub use review::{GitHubReviews, InMemoryReviews, Review, ReviewId, ReviewStatus, ReviewSystem};
pub use store::{ConfigStore, GitStore, MemoryStore};
