//! The capability contract a resource node implements to participate in
//! reconciliation.
//!
//! Participation is opt-in through trait satisfaction: a node advertises the
//! capability by returning itself from [`ResourceNode::as_change_action`],
//! so arbitrary resource kinds (composed or otherwise) can take part without
//! any inheritance relationship.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The kind of change a resource node undergoes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// The resource must be created.
    Create,
    /// The resource must be modified in place.
    Modify,
    /// The resource must be deleted.
    Delete,
    /// No change is required.
    None,
}

/// A node's answer to "should you act for this change?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActDecision {
    /// Whether the node must act.
    pub act: bool,
    /// Human-readable description of the decision.
    pub detail: String,
}

impl ActDecision {
    /// Creates a decision to act.
    #[must_use]
    pub fn act(detail: impl Into<String>) -> Self {
        Self {
            act: true,
            detail: detail.into(),
        }
    }

    /// Creates a decision not to act.
    #[must_use]
    pub fn skip(detail: impl Into<String>) -> Self {
        Self {
            act: false,
            detail: detail.into(),
        }
    }
}

/// Per-deployment-operation context handed to every capability call.
#[derive(Debug, Clone)]
pub struct ActionContext {
    deploy_operation_id: String,
    working_dir: PathBuf,
}

impl ActionContext {
    /// Creates a context for one deployment operation.
    #[must_use]
    pub fn new(deploy_operation_id: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            deploy_operation_id: deploy_operation_id.into(),
            working_dir: working_dir.into(),
        }
    }

    /// The id of the currently running deployment operation.
    #[must_use]
    pub fn deploy_operation_id(&self) -> &str {
        &self.deploy_operation_id
    }

    /// The working-data directory for this operation.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

/// The capability a resource node implements to participate in
/// reconciliation.
#[async_trait]
pub trait ChangeAction: Send + Sync {
    /// Decides whether this node must act for the given change.
    ///
    /// Returns `None` when the change does not apply to this node at all
    /// (e.g. a resource whose lifecycle is not managed here), and a
    /// decision otherwise.
    ///
    /// # Errors
    ///
    /// Any error propagates out of the observe phase uncaught.
    async fn should_act(&self, op: ChangeType, ctx: &ActionContext)
        -> Result<Option<ActDecision>>;

    /// Performs the real-world change.
    ///
    /// Only called after [`ChangeAction::should_act`] returned an acting
    /// decision for the same change type.
    ///
    /// # Errors
    ///
    /// Any error propagates to the caller executing the action list;
    /// already-applied actions are not undone.
    async fn action(&self, op: ChangeType, ctx: &ActionContext) -> Result<()>;
}

/// A node in a resource tree, as seen by the reconciler.
///
/// Identity is assigned by the external tree builder; the reconciler only
/// relies on it being stable across the before/after pair.
pub trait ResourceNode: Send + Sync {
    /// The stable per-node identity assigned by the tree builder.
    fn node_id(&self) -> &str;

    /// The resource kind name (e.g. `"image"`, `"container"`).
    fn kind_name(&self) -> &'static str;

    /// Returns the change capability if this node implements it.
    fn as_change_action(&self) -> Option<&dyn ChangeAction> {
        None
    }
}

/// Composite observation key: `node_id + ":" + kind_name`.
///
/// Including the kind means a node replaced by a different resource kind at
/// the same tree position keys differently, and is therefore treated as
/// delete-plus-create rather than a modify.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey(String);

impl NodeKey {
    /// Builds the composite key for a node.
    #[must_use]
    pub fn of(node: &dyn ResourceNode) -> Self {
        Self(format!("{}:{}", node.node_id(), node.kind_name()))
    }

    /// Builds a key from raw parts.
    #[must_use]
    pub fn new(node_id: &str, kind_name: &str) -> Self {
        Self(format!("{node_id}:{kind_name}"))
    }

    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}
