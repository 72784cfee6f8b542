//! Artifact registry client and image resolution.
//!
//! The resolver verifies that a candidate image actually exists in the
//! registry before a promotion is planned. Resolution is read-only and
//! distinguishes a genuinely missing image (fatal for the attempt) from a
//! registry outage (retried with exponential backoff).

pub mod client;
pub mod error;
pub mod resolver;

pub use client::{HttpRegistryClient, RegistryClient, StaticRegistryClient};
pub use error::RegistryError;
pub use resolver::ImageResolver;
