//! Per-environment promotion locks.
//!
//! Promotions to the same environment are serialized: the lock is taken
//! before planning and held until publication reaches a terminal outcome.
//! Dropping the guard releases the lock on every exit path, including
//! failures and abandoned in-flight plans.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// Registry of one async mutex per environment.
#[derive(Default)]
pub struct EnvironmentLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EnvironmentLocks {
    /// Empty lock registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for an environment, waiting if a promotion into it
    /// is already in flight. Locks for different environments are
    /// independent.
    pub async fn acquire(&self, environment: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(environment.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_environment_waits() {
        let locks = Arc::new(EnvironmentLocks::new());
        let guard = locks.acquire("dev").await;

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = locks2.acquire("dev").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn different_environments_are_independent() {
        let locks = EnvironmentLocks::new();
        let _dev = locks.acquire("dev").await;
        // Must not deadlock.
        let _qa = locks.acquire("qa").await;
    }
}
