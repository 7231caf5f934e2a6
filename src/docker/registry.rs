//! The registry/daemon tag resolution boundary.
//!
//! Unique-tag deduplication needs exactly one question answered: "what
//! content id does this reference currently point at?". [`TagResolver`]
//! captures that contract; [`RegistryResolver`] answers it over the
//! registry v2 HTTP API.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{RegistryError, Result, StevedoreError};
use crate::reference::ImageReference;

/// Manifest media types accepted when resolving a tag.
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// Resolves a reference to the content id it currently points at.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TagResolver: Send + Sync {
    /// Resolves the reference's current content id.
    ///
    /// Returns `Ok(None)` when the reference does not exist (e.g. the tag
    /// was deleted externally); transport failures are errors.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] on transport or protocol failures.
    async fn resolve_id(&self, reference: &ImageReference) -> Result<Option<String>>;
}

/// [`TagResolver`] over the registry v2 HTTP API.
///
/// Resolution is a manifest HEAD request; the registry reports the content
/// digest in the `Docker-Content-Digest` header.
#[derive(Debug, Clone)]
pub struct RegistryResolver {
    http: reqwest::Client,
    insecure_http: bool,
}

impl Default for RegistryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryResolver {
    /// Creates a resolver with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            insecure_http: false,
        }
    }

    /// Uses plain HTTP for all registries, not just local ones.
    #[must_use]
    pub const fn with_insecure_http(mut self, insecure: bool) -> Self {
        self.insecure_http = insecure;
        self
    }

    /// The manifest URL for a registry tag reference.
    fn manifest_url(&self, domain: &str, path: &str, tag: &str) -> String {
        let scheme = if self.insecure_http || is_local_domain(domain) {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{domain}/v2/{path}/manifests/{tag}")
    }
}

#[async_trait]
impl TagResolver for RegistryResolver {
    async fn resolve_id(&self, reference: &ImageReference) -> Result<Option<String>> {
        // A digest reference already names its content.
        if let Some(digest) = reference.digest() {
            return Ok(Some(digest.to_string()));
        }

        let (Some(domain), Some(path), Some(tag)) =
            (reference.domain(), reference.path(), reference.tag())
        else {
            return Err(StevedoreError::Registry(RegistryError::NotAddressable {
                reference: reference.to_string(),
            }));
        };

        let url = self.manifest_url(domain, path, tag);
        debug!("Resolving tag via {url}");

        let response = self
            .http
            .head(&url)
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await
            .map_err(|e| StevedoreError::Registry(RegistryError::network(e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StevedoreError::Registry(RegistryError::RequestFailed {
                status: response.status().as_u16(),
                reference: reference.to_string(),
            }));
        }

        let digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        digest.map_or_else(
            || {
                Err(StevedoreError::Registry(RegistryError::MissingDigest {
                    reference: reference.to_string(),
                }))
            },
            |digest| Ok(Some(digest)),
        )
    }
}

/// Local registries are conventionally reached over plain HTTP.
fn is_local_domain(domain: &str) -> bool {
    let host = domain.rsplit_once(':').map_or(domain, |(host, _)| host);
    host == "localhost" || host == "127.0.0.1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ImageReferenceBuilder;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reference_for(server: &MockServer) -> ImageReference {
        let domain = server
            .uri()
            .strip_prefix("http://")
            .expect("mock server uri")
            .to_string();
        ImageReferenceBuilder::new()
            .domain(domain)
            .path("team/app")
            .tag("v1")
            .freeze()
            .expect("valid reference")
    }

    #[tokio::test]
    async fn resolves_digest_from_manifest_head() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/v2/team/app/manifests/v1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("docker-content-digest", "sha256:cafebabe"),
            )
            .mount(&server)
            .await;

        let resolver = RegistryResolver::new();
        let resolved = resolver
            .resolve_id(&reference_for(&server))
            .await
            .expect("resolves");

        assert_eq!(resolved.as_deref(), Some("sha256:cafebabe"));
    }

    #[tokio::test]
    async fn missing_tag_resolves_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/v2/team/app/manifests/v1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let resolver = RegistryResolver::new();
        let resolved = resolver
            .resolve_id(&reference_for(&server))
            .await
            .expect("resolves");

        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/v2/team/app/manifests/v1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let resolver = RegistryResolver::new();
        let err = resolver
            .resolve_id(&reference_for(&server))
            .await
            .expect_err("fails");

        assert!(matches!(
            err,
            StevedoreError::Registry(RegistryError::RequestFailed { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn digest_reference_resolves_without_network() {
        let digest = format!("sha256:{}", "ab".repeat(32));
        let reference = ImageReferenceBuilder::new()
            .domain("registry.example.com")
            .path("team/app")
            .digest(digest.clone())
            .freeze()
            .expect("valid reference");

        let resolver = RegistryResolver::new();
        let resolved = resolver.resolve_id(&reference).await.expect("resolves");

        assert_eq!(resolved, Some(digest));
    }

    #[test]
    fn local_domains_use_plain_http() {
        let resolver = RegistryResolver::new();
        assert!(resolver
            .manifest_url("localhost:5000", "app", "v1")
            .starts_with("http://"));
        assert!(resolver
            .manifest_url("registry.example.com", "app", "v1")
            .starts_with("https://"));
    }
}
