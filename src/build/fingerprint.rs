//! Deterministic fingerprinting of build inputs.
//!
//! A fingerprint is a hash over a canonical serialization of every
//! build-affecting declared property of a resource. Identity fields are
//! never part of the input, so renaming a resource does not force a
//! rebuild.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{BuildError, Result};

/// Hasher for computing build-input fingerprints.
#[derive(Debug, Default)]
pub struct Fingerprinter;

impl Fingerprinter {
    /// Creates a new fingerprinter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the fingerprint of a serializable set of build inputs.
    ///
    /// The value is canonicalized through a JSON tree, whose map keys are
    /// stored in sorted order, so field ordering in the source type never
    /// affects the result.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError::Fingerprint`] if the inputs cannot be
    /// serialized.
    pub fn fingerprint<T: Serialize>(&self, inputs: &T) -> Result<String> {
        let canonical = serde_json::to_value(inputs).map_err(|e| BuildError::Fingerprint {
            message: e.to_string(),
        })?;

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}
