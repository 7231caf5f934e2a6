//! Mutable builder for assembling image references.
//!
//! The builder is the only mutable form of a reference: parsing lands here,
//! callers adjust fields, and [`ImageReferenceBuilder::freeze`] produces the
//! immutable [`ImageReference`] that crosses component boundaries.

use crate::error::Result;

use super::parser;
use super::types::ImageReference;

/// Mutable assembly form of an image reference.
#[derive(Debug, Clone, Default)]
pub struct ImageReferenceBuilder {
    domain: Option<String>,
    path: Option<String>,
    tag: Option<String>,
    digest: Option<String>,
    id: Option<String>,
    docker_host: Option<String>,
}

impl ImageReferenceBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a complete reference string into a builder.
    ///
    /// No defaults are applied.
    ///
    /// # Errors
    ///
    /// Returns a parse error naming the grammar part that failed.
    pub fn parse(reference: &str) -> Result<Self> {
        parser::parse(reference, parser::Mode::Strict)
    }

    /// Parses a familiar reference string into a builder, applying the
    /// common container-tool defaults.
    ///
    /// # Errors
    ///
    /// Returns a parse error naming the grammar part that failed.
    pub fn parse_familiar(reference: &str) -> Result<Self> {
        parser::parse(reference, parser::Mode::Familiar)
    }

    /// Sets the registry domain.
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets the repository path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Clears the tag.
    #[must_use]
    pub fn clear_tag(mut self) -> Self {
        self.tag = None;
        self
    }

    /// Sets the content digest.
    #[must_use]
    pub fn digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Sets the content id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the container daemon host.
    #[must_use]
    pub fn docker_host(mut self, docker_host: impl Into<String>) -> Self {
        self.docker_host = Some(docker_host.into());
        self
    }

    /// Sets the container daemon host if one is given.
    #[must_use]
    pub fn maybe_docker_host(mut self, docker_host: Option<&str>) -> Self {
        self.docker_host = docker_host.map(str::to_string);
        self
    }

    /// Sets the parsed field by grammar part name.
    pub(super) fn set_part(&mut self, part: parser::Part, value: String) {
        match part {
            parser::Part::Domain => self.domain = Some(value),
            parser::Part::Path => self.path = Some(value),
            parser::Part::Tag => self.tag = Some(value),
            parser::Part::Digest => self.digest = Some(value),
        }
    }

    /// Freezes the builder into an immutable reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the assembled fields violate the
    /// domain/docker-host mutual exclusion.
    pub fn freeze(self) -> Result<ImageReference> {
        ImageReference::from_fields(
            self.domain,
            self.path,
            self.tag,
            self.digest,
            self.id,
            self.docker_host,
        )
    }
}

impl From<&ImageReference> for ImageReferenceBuilder {
    fn from(reference: &ImageReference) -> Self {
        Self {
            domain: reference.domain().map(str::to_string),
            path: reference.path().map(str::to_string),
            tag: reference.tag().map(str::to_string),
            digest: reference.digest().map(str::to_string),
            id: reference.id().map(str::to_string),
            docker_host: reference.docker_host().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_thaw_freeze_round_trips() {
        let digest = format!("sha256:{}", "12".repeat(32));
        let first = ImageReferenceBuilder::new()
            .domain("registry.example.com")
            .path("team/app")
            .tag("v1")
            .digest(digest)
            .freeze()
            .expect("valid reference");

        let second = first.to_builder().freeze().expect("valid reference");

        assert_eq!(first, second);
    }

    #[test]
    fn parsed_round_trips_through_builder() {
        let reference =
            ImageReference::parse("registry.example.com:5000/team/app:v1").expect("parses");
        let again = reference.to_builder().freeze().expect("valid reference");

        assert_eq!(reference, again);
    }

    #[test]
    fn clear_tag_removes_tag() {
        let reference = ImageReferenceBuilder::new()
            .path("team/app")
            .tag("v1")
            .clear_tag()
            .freeze()
            .expect("valid reference");

        assert_eq!(reference.tag(), None);
    }
}
