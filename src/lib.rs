// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::redundant_clone)]     // Useless clones warning

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stevedore
//!
//! The change-reconciliation and build-artifact caching core of a declarative
//! container deployment system.
//!
//! ## Overview
//!
//! Stevedore turns a pair of resource trees (the previously deployed state
//! and the newly declared state) into an ordered list of concrete actions,
//! and makes the expensive step in that list (container image builds) cheap
//! to repeat:
//!
//! - Diff-driven change detection over arbitrary resource nodes
//! - A three-phase reconciler: observe, analyze, act
//! - Build-input fingerprinting so unchanged images are never rebuilt
//! - Unique-tag deduplication so unchanged content never mints new tags
//!
//! ## Architecture
//!
//! The system is built around **resource capability contracts**:
//!
//! 1. **Resource nodes** opt into reconciliation by implementing the change
//!    capability ([`ChangeAction`])
//! 2. **The reconciler** walks the tree diff, collects observations, and
//!    derives an action list
//! 3. **Build-capable nodes** consult their cache state before acting, so a
//!    deployment operation only pays for what actually changed
//!
//! ## Modules
//!
//! - [`reference`]: Container image reference parsing and assembly
//! - [`reconcile`]: Change detection and the three-phase reconciler
//! - [`build`]: Build-artifact caching for expensive image builds
//! - [`docker`]: Thin wrappers around the builder CLI and registry API
//! - [`error`]: The crate-wide error hierarchy
//!
//! ## Example
//!
//! ```no_run
//! use stevedore::{ActionReconciler, StartOptions, TreeDiff};
//!
//! # async fn run() -> stevedore::Result<()> {
//! let mut reconciler = ActionReconciler::new();
//! reconciler.start(StartOptions {
//!     deploy_operation_id: "op-7f3a".to_string(),
//!     working_dir: "/var/lib/stevedore".into(),
//! })?;
//!
//! let diff = TreeDiff::new();
//! let observations = reconciler.observe(&diff).await?;
//! let actions = reconciler.analyze(&observations)?;
//!
//! let ctx = reconciler.context()?.clone();
//! for action in &actions {
//!     action.act(&ctx).await?;
//! }
//! reconciler.finish()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod build;
pub mod docker;
pub mod error;
pub mod reconcile;
pub mod reference;

// ============================================================================
// Re-exports
// ============================================================================

pub use build::{BuildCacheState, Fingerprinter, ImageBuildResource, ImageSpec};
pub use docker::{BuildExecutor, DockerCliExecutor, RegistryResolver, TagResolver};
pub use error::{Result, StevedoreError};
pub use reconcile::{
    Action, ActionContext, ActionReconciler, ChangeAction, ChangeType, ResourceNode,
    StartOptions, TreeDiff,
};
pub use reference::{ImageReference, ImageReferenceBuilder, ReferenceKind};
