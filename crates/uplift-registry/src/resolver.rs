//! Image resolution with bounded retry.

use std::sync::Arc;
use std::time::Duration;

use crate::client::RegistryClient;
use crate::error::RegistryError;
use uplift_core::config::RetryConfig;
use uplift_core::ImageReference;

/// Verifies candidate images against the artifact registry.
///
/// Resolution is read-only and deterministic: the same `(repository, tag)`
/// input always yields the same [`ImageReference`]. Registry outages are
/// retried with exponential backoff up to the configured attempt budget;
/// a genuinely missing image fails immediately.
pub struct ImageResolver {
    client: Arc<dyn RegistryClient>,
    retry: RetryConfig,
}

impl ImageResolver {
    /// Build a resolver over a registry client.
    pub fn new(client: Arc<dyn RegistryClient>, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Confirm that `repository:tag` exists in the registry.
    ///
    /// Returns the verified reference, [`RegistryError::NotFound`] if the
    /// image is absent, or [`RegistryError::Unavailable`] once the retry
    /// budget is exhausted.
    pub async fn resolve(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<ImageReference, RegistryError> {
        let mut delay = Duration::from_millis(self.retry.base_delay_ms);
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.client.manifest_exists(repository, tag).await {
                Ok(true) => {
                    tracing::debug!(repository, tag, "image verified in registry");
                    return Ok(ImageReference::new(repository, tag));
                }
                Ok(false) => {
                    return Err(RegistryError::NotFound {
                        repository: repository.to_string(),
                        tag: tag.to_string(),
                    });
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        repository,
                        tag,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "registry unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => return Err(err),
            }
        }

        // attempts >= 1, so the loop always returns first.
        Err(RegistryError::Unavailable {
            reason: "retry budget exhausted".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `Unavailable` a fixed number of times, then succeeds.
    struct FlakyClient {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RegistryClient for FlakyClient {
        async fn manifest_exists(&self, _: &str, _: &str) -> Result<bool, RegistryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(RegistryError::Unavailable {
                    reason: "connection refused".to_string(),
                })
            } else {
                Ok(true)
            }
        }

        async fn list_tags(&self, _: &str) -> Result<BTreeSet<String>, RegistryError> {
            Ok(BTreeSet::new())
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn retries_unavailability_then_succeeds() {
        let client = Arc::new(FlakyClient {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let resolver = ImageResolver::new(client.clone(), fast_retry(4));

        let image = resolver
            .resolve("ghcr.io/acme/ledger", "main-abc1234")
            .await
            .unwrap();
        assert_eq!(image.tag, "main-abc1234");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_unavailability_after_budget() {
        let client = Arc::new(FlakyClient {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let resolver = ImageResolver::new(client.clone(), fast_retry(3));

        let err = resolver
            .resolve("ghcr.io/acme/ledger", "main-abc1234")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn missing_image_fails_without_retry() {
        struct AbsentClient {
            calls: AtomicU32,
        }

        #[async_trait]
        impl RegistryClient for AbsentClient {
            async fn manifest_exists(&self, _: &str, _: &str) -> Result<bool, RegistryError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }

            async fn list_tags(&self, _: &str) -> Result<BTreeSet<String>, RegistryError> {
                Ok(BTreeSet::new())
            }
        }

        let client = Arc::new(AbsentClient {
            calls: AtomicU32::new(0),
        });
        let resolver = ImageResolver::new(client.clone(), fast_retry(4));

        let err = resolver
            .resolve("ghcr.io/acme/ledger", "qa-abc1234")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolution_is_deterministic() {
        let client = Arc::new(FlakyClient {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let resolver = ImageResolver::new(client, fast_retry(1));

        let a = resolver
            .resolve("ghcr.io/acme/ledger", "stg-abc1234")
            .await
            .unwrap();
        let b = resolver
            .resolve("ghcr.io/acme/ledger", "stg-abc1234")
            .await
            .unwrap();
        assert_eq!(a, b);
    }
}
