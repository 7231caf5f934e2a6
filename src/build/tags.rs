//! Unique tag generation.
//!
//! Randomness is injected through [`SuffixSource`] so tag generation is
//! deterministic under test; the default source derives letters from v4
//! UUIDs.

use uuid::Uuid;

/// Length of the random suffix appended to unique tags.
pub const UNIQUE_SUFFIX_LEN: usize = 5;

/// Source of random alphabetic suffixes for unique tags.
pub trait SuffixSource: Send + Sync {
    /// Produces a lowercase alphabetic suffix of the given length.
    fn suffix(&self, len: usize) -> String;
}

/// Default [`SuffixSource`] backed by v4 UUIDs.
#[derive(Debug, Default)]
pub struct UuidSuffixSource;

impl SuffixSource for UuidSuffixSource {
    fn suffix(&self, len: usize) -> String {
        Uuid::new_v4()
            .as_bytes()
            .iter()
            .map(|byte| char::from(b'a' + byte % 26))
            .take(len)
            .collect()
    }
}

/// Mints a unique tag by appending a random alphabetic suffix to the
/// declared base tag.
#[must_use]
pub fn unique_tag(base_tag: &str, source: &dyn SuffixSource) -> String {
    format!("{base_tag}-{}", source.suffix(UNIQUE_SUFFIX_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_alphabetic_and_sized() {
        let source = UuidSuffixSource;
        let suffix = source.suffix(UNIQUE_SUFFIX_LEN);
        assert_eq!(suffix.len(), UNIQUE_SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| b.is_ascii_lowercase()));
    }

    #[test]
    fn unique_tag_preserves_base_prefix() {
        let source = UuidSuffixSource;
        let tag = unique_tag("v1", &source);
        assert!(tag.starts_with("v1-"));
        assert_eq!(tag.len(), "v1-".len() + UNIQUE_SUFFIX_LEN);
    }

    #[test]
    fn suffixes_vary() {
        let source = UuidSuffixSource;
        // 26^16 possibilities; two equal draws in a row would indicate a
        // broken source.
        let first = source.suffix(16);
        let second = source.suffix(16);
        assert_ne!(first, second);
    }
}
