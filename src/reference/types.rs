//! The frozen image reference value and its derived accessors.
//!
//! An [`ImageReference`] is an immutable snapshot of a parsed or assembled
//! reference. All derived forms (`name`, `familiar`, registry addresses) are
//! computed from the stored fields on every call, never cached, so a frozen
//! reference can never go stale against itself.

use serde::{Deserialize, Serialize};

use crate::error::{ReferenceError, Result, StevedoreError};

use super::builder::ImageReferenceBuilder;

/// The registry domain applied when a familiar reference names none.
pub const DEFAULT_DOMAIN: &str = "docker.io";

/// The tag applied when a familiar reference names none.
pub const DEFAULT_TAG: &str = "latest";

/// The path prefix for official images on the default domain.
pub const OFFICIAL_PREFIX: &str = "library/";

/// How a reference is addressed, derived from which fields are populated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    /// Not enough fields are set to address the image anywhere.
    Incomplete,
    /// Addressable on a registry via domain, path, and tag or digest.
    Registry,
    /// Addressable on a container daemon via its host.
    DockerHost,
}

/// An immutable container image reference.
///
/// Every field is optional; [`ImageReference::kind`] reports whether the
/// populated combination addresses anything. References cross component
/// boundaries only in this frozen form; use [`ImageReferenceBuilder`] for
/// parsing and incremental assembly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageReference {
    domain: Option<String>,
    path: Option<String>,
    tag: Option<String>,
    digest: Option<String>,
    id: Option<String>,
    docker_host: Option<String>,
}

impl ImageReference {
    /// Creates a frozen reference from raw fields.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::ConflictingAccess`] if both a daemon host
    /// and a registry domain are set.
    pub(super) fn from_fields(
        domain: Option<String>,
        path: Option<String>,
        tag: Option<String>,
        digest: Option<String>,
        id: Option<String>,
        docker_host: Option<String>,
    ) -> Result<Self> {
        if let (Some(host), Some(dom)) = (&docker_host, &domain) {
            return Err(StevedoreError::Reference(
                ReferenceError::ConflictingAccess {
                    docker_host: host.clone(),
                    domain: dom.clone(),
                },
            ));
        }
        Ok(Self {
            domain,
            path,
            tag,
            digest,
            id,
            docker_host,
        })
    }

    /// Parses a complete reference string.
    ///
    /// No defaults are applied; the input must already carry every part it
    /// means to have.
    ///
    /// # Errors
    ///
    /// Returns a [`ReferenceError`] naming the grammar part that failed.
    pub fn parse(reference: &str) -> Result<Self> {
        ImageReferenceBuilder::parse(reference)?.freeze()
    }

    /// Parses a familiar (possibly shortened) reference string.
    ///
    /// Applies the common container-tool defaults: `docker.io` for a
    /// missing domain, `library/` for bare official paths, and `latest`
    /// for a missing tag when no digest is given.
    ///
    /// # Errors
    ///
    /// Returns a [`ReferenceError`] naming the grammar part that failed.
    pub fn parse_familiar(reference: &str) -> Result<Self> {
        ImageReferenceBuilder::parse_familiar(reference)?.freeze()
    }

    /// Returns a mutable builder seeded from this reference.
    #[must_use]
    pub fn to_builder(&self) -> ImageReferenceBuilder {
        ImageReferenceBuilder::from(self)
    }

    /// The registry domain, if any.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// The repository path, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// The tag, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The content digest (`algorithm:hex`), if any.
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The content id (`algorithm:hex`), if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The container daemon host, if any.
    #[must_use]
    pub fn docker_host(&self) -> Option<&str> {
        self.docker_host.as_deref()
    }

    /// The repository name: `domain/path` when a domain is set, else `path`.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        let path = self.path.as_deref()?;
        Some(match self.domain.as_deref() {
            Some(domain) => format!("{domain}/{path}"),
            None => path.to_string(),
        })
    }

    /// The `name:tag` form, defined only when both path and tag are set.
    #[must_use]
    pub fn name_tag(&self) -> Option<String> {
        let name = self.name()?;
        let tag = self.tag.as_deref()?;
        Some(format!("{name}:{tag}"))
    }

    /// Classifies the reference by which fields are populated.
    #[must_use]
    pub fn kind(&self) -> ReferenceKind {
        if self.docker_host.is_some()
            && (self.id.is_some()
                || (self.path.is_some() && (self.tag.is_some() || self.digest.is_some())))
        {
            ReferenceKind::DockerHost
        } else if self.domain.is_some()
            && self.path.is_some()
            && (self.tag.is_some() || self.digest.is_some())
        {
            ReferenceKind::Registry
        } else {
            ReferenceKind::Incomplete
        }
    }

    /// The `domain/path:tag` registry address, if all three parts are set.
    #[must_use]
    pub fn registry_tag(&self) -> Option<String> {
        let domain = self.domain.as_deref()?;
        let path = self.path.as_deref()?;
        let tag = self.tag.as_deref()?;
        Some(format!("{domain}/{path}:{tag}"))
    }

    /// The `domain/path@digest` registry address, if all three parts are set.
    #[must_use]
    pub fn registry_digest(&self) -> Option<String> {
        let domain = self.domain.as_deref()?;
        let path = self.path.as_deref()?;
        let digest = self.digest.as_deref()?;
        Some(format!("{domain}/{path}@{digest}"))
    }

    /// The preferred registry address: digest form if available, else tag
    /// form. `None` unless the reference is remote-addressable.
    #[must_use]
    pub fn registry_ref(&self) -> Option<String> {
        self.registry_digest().or_else(|| self.registry_tag())
    }

    /// The shortened reference string with defaults elided.
    ///
    /// A digest-only registry reference keeps its full `domain/path@digest`
    /// form, since eliding anything from a content address would be
    /// ambiguous. Incomplete references have no familiar form.
    #[must_use]
    pub fn familiar(&self) -> Option<String> {
        let kind = self.kind();
        if kind == ReferenceKind::Registry && self.tag.is_none() && self.digest.is_some() {
            return self.registry_digest();
        }
        if kind == ReferenceKind::Incomplete {
            return None;
        }

        let Some(path) = self.path.as_deref() else {
            // Daemon references may be identified by content id alone.
            return self.id.clone();
        };

        let mut out = String::new();
        match self.domain.as_deref() {
            Some(DEFAULT_DOMAIN) => {
                out.push_str(path.strip_prefix(OFFICIAL_PREFIX).unwrap_or(path));
            }
            Some(domain) => {
                out.push_str(domain);
                out.push('/');
                out.push_str(path);
            }
            None => out.push_str(path),
        }

        let shown_tag = self.tag.as_deref().filter(|tag| *tag != DEFAULT_TAG);
        if let Some(tag) = shown_tag {
            out.push(':');
            out.push_str(tag);
        } else if let Some(digest) = self.digest.as_deref() {
            out.push('@');
            out.push_str(digest);
        }

        Some(out)
    }
}

impl std::fmt::Display for ImageReference {
    /// Renders the fullest available form of the reference.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = self.name() {
            write!(f, "{name}")?;
            if let Some(tag) = self.tag.as_deref() {
                write!(f, ":{tag}")?;
            }
            if let Some(digest) = self.digest.as_deref() {
                write!(f, "@{digest}")?;
            }
            return Ok(());
        }
        if let Some(id) = self.id.as_deref() {
            return write!(f, "{id}");
        }
        write!(f, "<incomplete reference>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ImageReferenceBuilder {
        ImageReferenceBuilder::new()
    }

    #[test]
    fn name_joins_domain_and_path() {
        let reference = builder()
            .domain("registry.example.com")
            .path("team/app")
            .tag("v1")
            .freeze()
            .expect("valid reference");

        assert_eq!(reference.name().as_deref(), Some("registry.example.com/team/app"));
        assert_eq!(
            reference.name_tag().as_deref(),
            Some("registry.example.com/team/app:v1")
        );
    }

    #[test]
    fn registry_ref_prefers_digest() {
        let digest = format!("sha256:{}", "ab".repeat(32));
        let reference = builder()
            .domain("registry.example.com")
            .path("team/app")
            .tag("v1")
            .digest(digest.clone())
            .freeze()
            .expect("valid reference");

        assert_eq!(
            reference.registry_ref(),
            Some(format!("registry.example.com/team/app@{digest}"))
        );
    }

    #[test]
    fn domain_and_docker_host_are_exclusive() {
        let result = builder()
            .domain("registry.example.com")
            .docker_host("tcp://build-host:2375")
            .path("app")
            .tag("v1")
            .freeze();

        assert!(matches!(
            result,
            Err(StevedoreError::Reference(
                ReferenceError::ConflictingAccess { .. }
            ))
        ));
    }

    #[test]
    fn kind_classification_table() {
        let digest = format!("sha256:{}", "cd".repeat(32));
        let id = format!("sha256:{}", "ef".repeat(32));

        // Every valid combination of field presence, respecting the
        // domain/docker_host mutual exclusion. Tuple order: domain, path,
        // tag, digest, docker_host, id.
        let cases: Vec<(bool, bool, bool, bool, bool, bool, ReferenceKind)> = vec![
            // Registry: domain + path + (tag | digest).
            (true, true, true, false, false, false, ReferenceKind::Registry),
            (true, true, false, true, false, false, ReferenceKind::Registry),
            (true, true, true, true, false, false, ReferenceKind::Registry),
            (true, true, true, false, false, true, ReferenceKind::Registry),
            // Docker host: host + (id | path + (tag | digest)).
            (false, false, false, false, true, true, ReferenceKind::DockerHost),
            (false, true, true, false, true, false, ReferenceKind::DockerHost),
            (false, true, false, true, true, false, ReferenceKind::DockerHost),
            (false, true, true, true, true, true, ReferenceKind::DockerHost),
            // Everything else is incomplete.
            (false, false, false, false, false, false, ReferenceKind::Incomplete),
            (true, true, false, false, false, false, ReferenceKind::Incomplete),
            (true, false, true, false, false, false, ReferenceKind::Incomplete),
            (false, true, true, false, false, false, ReferenceKind::Incomplete),
            (false, true, true, true, false, true, ReferenceKind::Incomplete),
            (false, false, false, false, false, true, ReferenceKind::Incomplete),
            (false, false, false, false, true, false, ReferenceKind::Incomplete),
            (false, true, false, false, true, false, ReferenceKind::Incomplete),
            (false, true, false, false, true, true, ReferenceKind::DockerHost),
            (true, false, false, true, false, false, ReferenceKind::Incomplete),
        ];

        for (has_domain, has_path, has_tag, has_digest, has_host, has_id, expected) in cases {
            let mut b = builder();
            if has_domain {
                b = b.domain("registry.example.com");
            }
            if has_path {
                b = b.path("team/app");
            }
            if has_tag {
                b = b.tag("v1");
            }
            if has_digest {
                b = b.digest(digest.clone());
            }
            if has_host {
                b = b.docker_host("tcp://build-host:2375");
            }
            if has_id {
                b = b.id(id.clone());
            }

            let reference = b.freeze().expect("valid combination");
            assert_eq!(
                reference.kind(),
                expected,
                "fields: domain={has_domain} path={has_path} tag={has_tag} \
                 digest={has_digest} host={has_host} id={has_id}"
            );
        }
    }

    #[test]
    fn familiar_elides_defaults() {
        let reference = builder()
            .domain(DEFAULT_DOMAIN)
            .path("library/ubuntu")
            .tag(DEFAULT_TAG)
            .freeze()
            .expect("valid reference");

        assert_eq!(reference.familiar().as_deref(), Some("ubuntu"));
    }

    #[test]
    fn familiar_keeps_foreign_domain_and_tag() {
        let reference = builder()
            .domain("ghcr.io")
            .path("org/app")
            .tag("v2.1")
            .freeze()
            .expect("valid reference");

        assert_eq!(reference.familiar().as_deref(), Some("ghcr.io/org/app:v2.1"));
    }

    #[test]
    fn familiar_digest_only_keeps_full_form() {
        let digest = format!("sha256:{}", "ab".repeat(32));
        let reference = builder()
            .domain(DEFAULT_DOMAIN)
            .path("library/ubuntu")
            .digest(digest.clone())
            .freeze()
            .expect("valid reference");

        assert_eq!(
            reference.familiar(),
            Some(format!("docker.io/library/ubuntu@{digest}"))
        );
    }

    #[test]
    fn familiar_appends_digest_when_no_tag_shown() {
        let digest = format!("sha256:{}", "ab".repeat(32));
        let reference = builder()
            .docker_host("tcp://build-host:2375")
            .path("team/app")
            .tag(DEFAULT_TAG)
            .digest(digest.clone())
            .freeze()
            .expect("valid reference");

        assert_eq!(reference.familiar(), Some(format!("team/app@{digest}")));
    }

    #[test]
    fn familiar_undefined_for_incomplete() {
        let reference = builder()
            .path("team/app")
            .freeze()
            .expect("valid reference");

        assert_eq!(reference.familiar(), None);
    }
}
