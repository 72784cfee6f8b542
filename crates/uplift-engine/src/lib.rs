//! Promotion engine.
//!
//! Orchestrates a promotion end to end: environment lookup, concurrent
//! image verification, mutation planning, and publication, all under a
//! per-environment lock so promotions into the same environment never
//! interleave. Promotions into different environments run fully in
//! parallel.

pub mod audit;
pub mod engine;
pub mod error;
pub mod locks;
pub mod planner;

pub use audit::{AuditSink, MemoryAuditSink, PromotionEvent, PromotionEventKind, TracingAuditSink};
pub use engine::{Outcome, PromotionEngine};
pub use error::EngineError;
pub use locks::EnvironmentLocks;
pub use planner::{Plan, Planner};
