//! Versioned configuration store.
//!
//! The store is the only externally persisted state: a tree of overlay files
//! per environment, with an append-only commit history behind it. The live
//! cluster is never written directly; every change flows through a commit
//! here and is picked up by the sync controller.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::process::Command;

use crate::error::StoreError;
use uplift_core::config::RepoConfig;

/// A versioned tree of configuration files.
///
/// Paths are relative to the tree root. `commit` records the given files and
/// returns the new head revision; a concurrent mutation of the same files
/// surfaces as [`StoreError::Conflict`], after which the caller re-fetches
/// and retries once.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read a file's current contents.
    async fn read_file(&self, path: &Path) -> Result<String, StoreError>;

    /// Stage new contents for a file.
    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), StoreError>;

    /// Commit staged files to trunk and return the new head SHA.
    async fn commit(&self, message: &str, paths: &[PathBuf]) -> Result<String, StoreError>;

    /// Commit staged files to a named branch (for review-gated changes)
    /// and return the branch head SHA.
    async fn commit_to_branch(
        &self,
        branch: &str,
        message: &str,
        paths: &[PathBuf],
    ) -> Result<String, StoreError>;

    /// Current trunk head SHA.
    async fn head(&self) -> Result<String, StoreError>;

    /// Refresh the local view of the tree from its source of truth.
    async fn fetch_latest(&self) -> Result<(), StoreError>;

    /// Revert the most recent commit touching `prefix`, returning the new
    /// head SHA. This is the explicit compensating action for an already
    /// published promotion; nothing reverts automatically.
    async fn revert_last_touching(
        &self,
        prefix: &Path,
        message: &str,
    ) -> Result<String, StoreError>;
}

/// Store backed by a local git checkout, shelling out to `git`.
pub struct GitStore {
    root: PathBuf,
    trunk: String,
    remote: String,
    push: bool,
}

impl GitStore {
    /// Build a store over an existing checkout.
    pub fn from_config(config: &RepoConfig) -> Self {
        Self {
            root: config.path.clone(),
            trunk: config.trunk_branch.clone(),
            remote: config.remote.clone(),
            push: config.push,
        }
    }

    /// Run a git subcommand in the tree root, capturing stdout.
    async fn git(&self, args: &[&str]) -> Result<String, StoreError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let command = args.first().copied().unwrap_or("git").to_string();
            // Non-fast-forward pushes and merge conflicts mean the tree
            // moved underneath us.
            if stderr.contains("non-fast-forward")
                || stderr.contains("fetch first")
                || stderr.contains("CONFLICT")
            {
                Err(StoreError::Conflict { message: stderr })
            } else {
                Err(StoreError::Git { command, stderr })
            }
        }
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl ConfigStore for GitStore {
    async fn read_file(&self, path: &Path) -> Result<String, StoreError> {
        let full = self.absolute(path);
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::NotFound => StoreError::MissingFile {
                    path: path.to_path_buf(),
                },
                _ => StoreError::Io { path: full, source },
            })
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), StoreError> {
        let full = self.absolute(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&full, contents)
            .await
            .map_err(|source| StoreError::Io { path: full, source })
    }

    async fn commit(&self, message: &str, paths: &[PathBuf]) -> Result<String, StoreError> {
        self.git(&["checkout", &self.trunk]).await?;
        let mut add = vec!["add".to_string()];
        add.extend(paths.iter().map(|p| p.display().to_string()));
        let add_refs: Vec<&str> = add.iter().map(String::as_str).collect();
        self.git(&add_refs).await?;
        self.git(&["commit", "-m", message]).await?;
        let sha = self.git(&["rev-parse", "HEAD"]).await?;
        if self.push {
            self.git(&["push", &self.remote, &self.trunk]).await?;
        }
        tracing::info!(sha = %sha, "committed configuration change");
        Ok(sha)
    }

    async fn commit_to_branch(
        &self,
        branch: &str,
        message: &str,
        paths: &[PathBuf],
    ) -> Result<String, StoreError> {
        self.git(&["checkout", "-B", branch, &self.trunk]).await?;
        let mut add = vec!["add".to_string()];
        add.extend(paths.iter().map(|p| p.display().to_string()));
        let add_refs: Vec<&str> = add.iter().map(String::as_str).collect();
        self.git(&add_refs).await?;
        self.git(&["commit", "-m", message]).await?;
        let sha = self.git(&["rev-parse", "HEAD"]).await?;
        if self.push {
            self.git(&["push", "-u", &self.remote, branch]).await?;
        }
        // Leave the checkout back on trunk for subsequent reads.
        self.git(&["checkout", &self.trunk]).await?;
        Ok(sha)
    }

    async fn head(&self) -> Result<String, StoreError> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    async fn fetch_latest(&self) -> Result<(), StoreError> {
        self.git(&["fetch", &self.remote]).await?;
        self.git(&["checkout", &self.trunk]).await?;
        self.git(&[
            "reset",
            "--hard",
            &format!("{}/{}", self.remote, self.trunk),
        ])
        .await?;
        Ok(())
    }

    async fn revert_last_touching(
        &self,
        prefix: &Path,
        message: &str,
    ) -> Result<String, StoreError> {
        let prefix = prefix.display().to_string();
        let sha = self
            .git(&["log", "-n", "1", "--format=%H", "--", &prefix])
            .await?;
        if sha.is_empty() {
            return Err(StoreError::MissingFile {
                path: PathBuf::from(prefix),
            });
        }
        self.git(&["revert", "--no-edit", &sha]).await?;
        self.git(&["commit", "--amend", "-m", message]).await?;
        let head = self.git(&["rev-parse", "HEAD"]).await?;
        if self.push {
            self.git(&["push", &self.remote, &self.trunk]).await?;
        }
        tracing::info!(reverted = %sha, head = %head, "reverted configuration change");
        Ok(head)
    }
}

/// A recorded in-memory commit.
#[derive(Debug, Clone)]
struct MemoryCommit {
    sha: String,
    message: String,
    /// Contents of each touched file before this commit, for revert.
    before: BTreeMap<PathBuf, Option<String>>,
    touched: Vec<PathBuf>,
}

/// In-memory store used by the test suites.
///
/// Supports conflict injection: each queued conflict makes the next `commit`
/// fail exactly once, mimicking a concurrent writer.
#[derive(Default)]
pub struct MemoryStore {
    files: RwLock<BTreeMap<PathBuf, String>>,
    commits: RwLock<Vec<MemoryCommit>>,
    branch_commits: RwLock<Vec<(String, String)>>,
    /// Pre-write contents of files staged since the last commit.
    pending: RwLock<BTreeMap<PathBuf, Option<String>>>,
    counter: AtomicU64,
    conflicts: AtomicU32,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file without recording a commit.
    pub fn seed(&self, path: impl Into<PathBuf>, contents: &str) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path.into(), contents.to_string());
    }

    /// Make the next `commit` fail with a conflict.
    pub fn inject_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of commits recorded on trunk.
    pub fn commit_count(&self) -> usize {
        self.commits.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Messages of trunk commits, oldest first.
    pub fn commit_messages(&self) -> Vec<String> {
        self.commits
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|c| c.message.clone())
            .collect()
    }

    fn next_sha(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{n:07x}{:033x}", n * 0x9e3779b9u64)
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn read_file(&self, path: &Path) -> Result<String, StoreError> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::MissingFile {
                path: path.to_path_buf(),
            })
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), StoreError> {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        let previous = files.insert(path.to_path_buf(), contents.to_string());
        let mut pending = self.pending.write().unwrap_or_else(|e| e.into_inner());
        // Keep the oldest pre-write contents if staged more than once.
        pending.entry(path.to_path_buf()).or_insert(previous);
        Ok(())
    }

    async fn commit(&self, message: &str, paths: &[PathBuf]) -> Result<String, StoreError> {
        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict {
                message: "concurrent change to the tree".to_string(),
            });
        }

        let sha = self.next_sha();
        let before = {
            let mut pending = self.pending.write().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *pending)
        };
        let mut commits = self.commits.write().unwrap_or_else(|e| e.into_inner());
        commits.push(MemoryCommit {
            sha: sha.clone(),
            message: message.to_string(),
            before,
            touched: paths.to_vec(),
        });
        Ok(sha)
    }

    async fn commit_to_branch(
        &self,
        branch: &str,
        _message: &str,
        _paths: &[PathBuf],
    ) -> Result<String, StoreError> {
        let sha = self.next_sha();
        let mut branches = self
            .branch_commits
            .write()
            .unwrap_or_else(|e| e.into_inner());
        branches.push((branch.to_string(), sha.clone()));
        Ok(sha)
    }

    async fn head(&self) -> Result<String, StoreError> {
        let commits = self.commits.read().unwrap_or_else(|e| e.into_inner());
        Ok(commits
            .last()
            .map(|c| c.sha.clone())
            .unwrap_or_else(|| "0000000".to_string()))
    }

    async fn fetch_latest(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn revert_last_touching(
        &self,
        prefix: &Path,
        message: &str,
    ) -> Result<String, StoreError> {
        let target = {
            let commits = self.commits.read().unwrap_or_else(|e| e.into_inner());
            commits
                .iter()
                .rev()
                .find(|c| c.touched.iter().any(|p| p.starts_with(prefix)))
                .cloned()
        };
        let Some(target) = target else {
            return Err(StoreError::MissingFile {
                path: prefix.to_path_buf(),
            });
        };

        {
            let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
            for (path, before) in &target.before {
                match before {
                    Some(contents) => files.insert(path.clone(), contents.clone()),
                    None => files.remove(path),
                };
            }
        }
        self.commit(message, &target.touched).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_files() {
        let store = MemoryStore::new();
        let path = PathBuf::from("environments/dev/kustomization.yaml");
        store.seed(&path, "images: []\n");

        assert_eq!(store.read_file(&path).await.unwrap(), "images: []\n");
        store.write_file(&path, "images:\n- name: ledger\n").await.unwrap();
        assert!(store.read_file(&path).await.unwrap().contains("ledger"));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let store = MemoryStore::new();
        let err = store
            .read_file(Path::new("environments/qa/kustomization.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingFile { .. }));
    }

    #[tokio::test]
    async fn injected_conflict_fails_exactly_one_commit() {
        let store = MemoryStore::new();
        store.inject_conflict();

        let err = store.commit("first", &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let sha = store.commit("second", &[]).await.unwrap();
        assert_eq!(store.head().await.unwrap(), sha);
        assert_eq!(store.commit_count(), 1);
    }
}
