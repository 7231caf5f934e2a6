//! Persisted build cache state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reference::ImageReference;

/// The cache state of one build-capable resource, persisted by the
/// embedding system across deployment operations.
///
/// Mutated only by a successful build; validity checks read it without
/// touching it. `deploy_operation_id` scopes validity to "this deployment
/// run"; `input_fingerprint` scopes it to "these declared build inputs".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildCacheState {
    /// The deployment operation that produced this build.
    pub deploy_operation_id: String,
    /// The image the build produced.
    pub built_image: ImageReference,
    /// Fingerprint of the declared build inputs at build time.
    pub input_fingerprint: String,
    /// The unique tag to treat as "previous" on the next build, when the
    /// resource runs in unique-tag mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_unique_tag: Option<String>,
    /// When the build completed.
    pub built_at: DateTime<Utc>,
}

impl BuildCacheState {
    /// Creates the state committed after a successful build.
    #[must_use]
    pub fn new(
        deploy_operation_id: impl Into<String>,
        built_image: ImageReference,
        input_fingerprint: impl Into<String>,
        previous_unique_tag: Option<String>,
    ) -> Self {
        Self {
            deploy_operation_id: deploy_operation_id.into(),
            built_image,
            input_fingerprint: input_fingerprint.into(),
            previous_unique_tag,
            built_at: Utc::now(),
        }
    }
}
