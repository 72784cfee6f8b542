//! Registry client trait and implementations.
//!
//! [`HttpRegistryClient`] speaks the Docker Registry HTTP API v2 (manifest
//! HEAD requests and tag listing). [`StaticRegistryClient`] serves a fixed
//! set of images and backs the test suites.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::RwLock;

use crate::error::RegistryError;
use uplift_core::config::RegistryConfig;

/// Read-only view of the artifact registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Whether a manifest exists for `repository:tag`.
    async fn manifest_exists(&self, repository: &str, tag: &str) -> Result<bool, RegistryError>;

    /// All tags currently pushed to a repository.
    async fn list_tags(&self, repository: &str) -> Result<BTreeSet<String>, RegistryError>;
}

/// Docker Registry HTTP API v2 client.
pub struct HttpRegistryClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

/// Response body of `GET /v2/<name>/tags/list`.
#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Vec<String>,
}

impl HttpRegistryClient {
    /// Build a client from registry configuration, reading the bearer token
    /// from the configured environment variable if one is named.
    pub fn from_config(config: &RegistryConfig) -> Self {
        let token = config
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        Self {
            http: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Strip a leading registry host from a repository reference.
    ///
    /// Config refers to images as `ghcr.io/acme/ledger`; the v2 API wants
    /// just `acme/ledger` under the registry's own base URL. A first path
    /// segment containing a dot or colon is treated as a host.
    fn repository_path(repository: &str) -> &str {
        match repository.split_once('/') {
            Some((head, rest)) if head.contains('.') || head.contains(':') => rest,
            _ => repository,
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    fn map_transport_error(err: reqwest::Error) -> RegistryError {
        RegistryError::Unavailable {
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn manifest_exists(&self, repository: &str, tag: &str) -> Result<bool, RegistryError> {
        let path = Self::repository_path(repository);
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, path, tag);
        let response = self
            .request(reqwest::Method::HEAD, url)
            .header(
                "Accept",
                "application/vnd.docker.distribution.manifest.v2+json",
            )
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            Err(RegistryError::Denied {
                repository: repository.to_string(),
                reason: format!("HTTP {status}"),
            })
        } else {
            Err(RegistryError::Unavailable {
                reason: format!("manifest check returned HTTP {status}"),
            })
        }
    }

    async fn list_tags(&self, repository: &str) -> Result<BTreeSet<String>, RegistryError> {
        let path = Self::repository_path(repository);
        let url = format!("{}/v2/{}/tags/list", self.base_url, path);
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound {
                repository: repository.to_string(),
                tag: "*".to_string(),
            });
        }
        if !status.is_success() {
            return Err(RegistryError::Unavailable {
                reason: format!("tag listing returned HTTP {status}"),
            });
        }

        let body: TagList = response.json().await.map_err(Self::map_transport_error)?;
        Ok(body.tags.into_iter().collect())
    }
}

/// In-memory registry serving a fixed set of `repository:tag` pairs.
#[derive(Default)]
pub struct StaticRegistryClient {
    images: RwLock<BTreeSet<(String, String)>>,
}

impl StaticRegistryClient {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image to the registry.
    pub fn push(&self, repository: &str, tag: &str) {
        let mut images = self.images.write().unwrap_or_else(|e| e.into_inner());
        images.insert((repository.to_string(), tag.to_string()));
    }
}

#[async_trait]
impl RegistryClient for StaticRegistryClient {
    async fn manifest_exists(&self, repository: &str, tag: &str) -> Result<bool, RegistryError> {
        let images = self.images.read().unwrap_or_else(|e| e.into_inner());
        Ok(images.contains(&(repository.to_string(), tag.to_string())))
    }

    async fn list_tags(&self, repository: &str) -> Result<BTreeSet<String>, RegistryError> {
        let images = self.images.read().unwrap_or_else(|e| e.into_inner());
        Ok(images
            .iter()
            .filter(|(repo, _)| repo == repository)
            .map(|(_, tag)| tag.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_path_strips_registry_host() {
        assert_eq!(
            HttpRegistryClient::repository_path("ghcr.io/acme/ledger"),
            "acme/ledger"
        );
        assert_eq!(
            HttpRegistryClient::repository_path("localhost:5000/ledger"),
            "ledger"
        );
        assert_eq!(
            HttpRegistryClient::repository_path("acme/ledger"),
            "acme/ledger"
        );
    }

    #[tokio::test]
    async fn static_client_serves_pushed_images() {
        let client = StaticRegistryClient::new();
        client.push("ghcr.io/acme/ledger", "main-abc1234");

        assert!(client
            .manifest_exists("ghcr.io/acme/ledger", "main-abc1234")
            .await
            .unwrap());
        assert!(!client
            .manifest_exists("ghcr.io/acme/ledger", "main-fffffff")
            .await
            .unwrap());

        let tags = client.list_tags("ghcr.io/acme/ledger").await.unwrap();
        assert!(tags.contains("main-abc1234"));
    }
}
