//! Configuration mutations: the unit of change a promotion produces.
//!
//! A mutation is an ordered set of key edits against an environment's overlay
//! files. Construction enforces the isolation invariant: every edited file
//! must live under the target environment's overlay directory, so a staging
//! promotion can never touch dev or qa files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while constructing a mutation.
#[derive(Debug, Error)]
pub enum MutationError {
    /// An edit targets a file outside the environment's overlay directory.
    #[error(
        "edit to {file} escapes the {environment} overlay ({overlay_root}); \
         cross-environment mutations are forbidden"
    )]
    CrossEnvironmentEdit {
        /// The offending file path.
        file: PathBuf,
        /// Target environment name.
        environment: String,
        /// The overlay directory edits must stay within.
        overlay_root: PathBuf,
    },
}

/// A single key edit inside an overlay file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEdit {
    /// File the edit applies to, relative to the config repo root.
    pub file_path: PathBuf,
    /// Dotted key being changed, e.g. `images[ledger].newTag`.
    pub key: String,
    /// Value currently recorded in the tree.
    pub old_value: String,
    /// Value after the mutation.
    pub new_value: String,
}

impl MutationEdit {
    /// Whether this edit actually changes anything.
    pub fn is_noop(&self) -> bool {
        self.old_value == self.new_value
    }
}

/// An ordered set of edits confined to one environment's overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationMutation {
    environment: String,
    overlay_root: PathBuf,
    edits: Vec<MutationEdit>,
}

impl ConfigurationMutation {
    /// Build a mutation, verifying that every edit stays inside the
    /// environment's overlay directory.
    pub fn new(
        environment: impl Into<String>,
        overlay_root: impl Into<PathBuf>,
        edits: Vec<MutationEdit>,
    ) -> Result<Self, MutationError> {
        let environment = environment.into();
        let overlay_root = overlay_root.into();
        for edit in &edits {
            if !edit.file_path.starts_with(&overlay_root) {
                return Err(MutationError::CrossEnvironmentEdit {
                    file: edit.file_path.clone(),
                    environment,
                    overlay_root,
                });
            }
        }
        Ok(Self {
            environment,
            overlay_root,
            edits,
        })
    }

    /// Target environment name.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Overlay directory the mutation is confined to.
    pub fn overlay_root(&self) -> &Path {
        &self.overlay_root
    }

    /// The edits, in application order.
    pub fn edits(&self) -> &[MutationEdit] {
        &self.edits
    }

    /// Whether the mutation changes nothing (same-commit re-promotion).
    pub fn is_empty(&self) -> bool {
        self.edits.iter().all(MutationEdit::is_noop)
    }

    /// Distinct files touched by the mutation.
    pub fn files(&self) -> BTreeSet<&Path> {
        self.edits.iter().map(|e| e.file_path.as_path()).collect()
    }

    /// One-line-per-edit summary used in commit and review bodies.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for edit in &self.edits {
            out.push_str(&format!(
                "{}: {} {} -> {}\n",
                edit.file_path.display(),
                edit.key,
                edit.old_value,
                edit.new_value
            ));
        }
        out
    }
}
