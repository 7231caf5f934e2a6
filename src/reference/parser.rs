//! Reference string parsing against the fixed grammar.
//!
//! Grammar:
//!
//! ```text
//! reference := name [":" tag] ["@" digest]
//! name      := [domain "/"] path
//! domain    := component ("." component)* (":" port)?
//! path      := segment ("/" segment)*
//! tag       := \w[\w.-]{0,127}
//! digest    := algorithm ":" hex   (at least 32 hex characters)
//! ```
//!
//! Parsing is pure string matching; a value that does not match is a hard
//! parse error carrying the offending value and the part that failed.

use crate::error::{ReferenceError, Result};

use super::builder::ImageReferenceBuilder;
use super::types::{DEFAULT_DOMAIN, DEFAULT_TAG, OFFICIAL_PREFIX};

/// Maximum length of a tag.
const MAX_TAG_LEN: usize = 128;

/// Minimum number of hex characters in a digest.
const MIN_DIGEST_HEX_LEN: usize = 32;

/// Parsing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Mode {
    /// The input must already be a complete reference; no defaults.
    Strict,
    /// Common container-tool conventions: default domain, official-image
    /// prefix, and default tag are applied.
    Familiar,
}

/// A grammar part, used to report which part of a reference failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Part {
    /// The registry domain.
    Domain,
    /// The repository path.
    Path,
    /// The tag.
    Tag,
    /// The content digest.
    Digest,
}

/// Parses a reference string into a builder.
pub(super) fn parse(input: &str, mode: Mode) -> Result<ImageReferenceBuilder> {
    if input.is_empty() {
        return Err(ReferenceError::invalid(input, "reference").into());
    }

    let mut builder = ImageReferenceBuilder::new();

    // Digest comes after '@', tag after the last ':' that is not part of a
    // domain port (i.e. not followed by a '/').
    let (rest, digest) = split_digest(input);
    let (name, tag) = split_tag(rest);

    if let Some(digest) = digest {
        validate_digest(digest)?;
        builder.set_part(Part::Digest, digest.to_string());
    }
    if let Some(tag) = tag {
        validate(tag, Part::Tag, is_valid_tag)?;
        builder.set_part(Part::Tag, tag.to_string());
    }

    let (domain, path) = match mode {
        Mode::Strict => split_domain_strict(name),
        Mode::Familiar => split_domain_familiar(name),
    };

    if let Some(domain) = &domain {
        validate(domain, Part::Domain, is_valid_domain)?;
        builder.set_part(Part::Domain, domain.clone());
    }
    validate(&path, Part::Path, is_valid_path)?;
    builder.set_part(Part::Path, path);

    if mode == Mode::Familiar && tag.is_none() && digest.is_none() {
        builder.set_part(Part::Tag, DEFAULT_TAG.to_string());
    }

    Ok(builder)
}

/// Splits a trailing `@digest` off the reference, if present.
fn split_digest(input: &str) -> (&str, Option<&str>) {
    match input.split_once('@') {
        Some((rest, digest)) => (rest, Some(digest)),
        None => (input, None),
    }
}

/// Splits a trailing `:tag` off the name, if present.
///
/// A colon inside the domain (a port) is always followed by a `/`, so the
/// tag separator is the last colon with no slash after it.
fn split_tag(input: &str) -> (&str, Option<&str>) {
    match input.rfind(':') {
        Some(idx) if !input[idx..].contains('/') => (&input[..idx], Some(&input[idx + 1..])),
        _ => (input, None),
    }
}

/// Splits the domain off a name by grammar alone.
///
/// The segment before the first `/` is the domain whenever it matches the
/// domain grammar; otherwise the whole name is the path.
fn split_domain_strict(name: &str) -> (Option<String>, String) {
    match name.split_once('/') {
        Some((head, tail)) if is_valid_domain(head) => {
            (Some(head.to_string()), tail.to_string())
        }
        _ => (None, name.to_string()),
    }
}

/// Splits the domain off a name using familiar conventions, applying the
/// default domain and official-image prefix where elided.
fn split_domain_familiar(name: &str) -> (Option<String>, String) {
    let (domain, path) = match name.split_once('/') {
        // An explicit domain must look like a host: contain a '.' or ':',
        // or be exactly "localhost".
        Some((head, tail))
            if head.contains('.') || head.contains(':') || head == "localhost" =>
        {
            (head.to_string(), tail.to_string())
        }
        _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
    };

    let path = if domain == DEFAULT_DOMAIN && !path.contains('/') {
        format!("{OFFICIAL_PREFIX}{path}")
    } else {
        path
    };

    (Some(domain), path)
}

/// Runs a grammar predicate, converting failure into a parse error.
fn validate(value: &str, part: Part, check: fn(&str) -> bool) -> Result<()> {
    if check(value) {
        Ok(())
    } else {
        Err(ReferenceError::invalid(value, part.name()).into())
    }
}

/// Validates a digest and reports the exact failure.
fn validate_digest(digest: &str) -> Result<()> {
    if is_valid_digest(digest) {
        Ok(())
    } else {
        Err(ReferenceError::invalid(digest, Part::Digest.name()).into())
    }
}

impl Part {
    /// The grammar part name used in parse errors.
    pub(super) const fn name(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Path => "path",
            Self::Tag => "tag",
            Self::Digest => "digest",
        }
    }
}

/// Checks `component ("." component)* (":" port)?`.
fn is_valid_domain(domain: &str) -> bool {
    let host = match domain.rsplit_once(':') {
        Some((host, port)) => {
            if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                return false;
            }
            host
        }
        None => domain,
    };

    !host.is_empty() && host.split('.').all(is_valid_domain_component)
}

/// A domain component: alphanumerics with interior hyphens.
fn is_valid_domain_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let Some((&first, rest)) = bytes.split_first() else {
        return false;
    };
    let Some((&last, _)) = bytes.split_last() else {
        return false;
    };
    first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && rest.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

/// Checks `segment ("/" segment)*`.
fn is_valid_path(path: &str) -> bool {
    !path.is_empty() && path.split('/').all(is_valid_path_segment)
}

/// A path segment: lowercase alphanumeric runs joined by `.`, `_`, `__`,
/// or a run of `-`.
fn is_valid_path_segment(segment: &str) -> bool {
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    let bytes = segment.as_bytes();
    let (Some(&first), Some(&last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    if !is_alnum(first) || !is_alnum(last) {
        return false;
    }

    // Every run of separator characters must be ".", "_", "__", or "-"+.
    let mut idx = 0;
    while idx < bytes.len() {
        if is_alnum(bytes[idx]) {
            idx += 1;
            continue;
        }
        let start = idx;
        while idx < bytes.len() && !is_alnum(bytes[idx]) {
            idx += 1;
        }
        if !is_valid_separator(&segment[start..idx]) {
            return false;
        }
    }
    true
}

/// A separator between alphanumeric runs in a path segment.
fn is_valid_separator(separator: &str) -> bool {
    matches!(separator, "." | "_" | "__")
        || (!separator.is_empty() && separator.bytes().all(|b| b == b'-'))
}

/// Checks `\w[\w.-]{0,127}`.
fn is_valid_tag(tag: &str) -> bool {
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';

    let bytes = tag.as_bytes();
    let Some((&first, rest)) = bytes.split_first() else {
        return false;
    };
    bytes.len() <= MAX_TAG_LEN
        && is_word(first)
        && rest.iter().all(|b| is_word(*b) || *b == b'.' || *b == b'-')
}

/// Checks `algorithm ":" hex` with at least 32 hex characters.
fn is_valid_digest(digest: &str) -> bool {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return false;
    };
    is_valid_algorithm(algorithm)
        && hex.len() >= MIN_DIGEST_HEX_LEN
        && hex.bytes().all(|b| b.is_ascii_hexdigit())
}

/// An algorithm name: lowercase alphanumeric runs joined by `+`, `.`, `_`,
/// or `-`.
fn is_valid_algorithm(algorithm: &str) -> bool {
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    let bytes = algorithm.as_bytes();
    let (Some(&first), Some(&last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    is_alnum(first)
        && is_alnum(last)
        && bytes
            .iter()
            .all(|b| is_alnum(*b) || matches!(b, b'+' | b'.' | b'_' | b'-'))
}
