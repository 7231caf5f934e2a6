//! Container image reference model and parsing.

mod builder;
mod parser;
mod types;

pub use builder::ImageReferenceBuilder;
pub use types::{ImageReference, ReferenceKind, DEFAULT_DOMAIN, DEFAULT_TAG, OFFICIAL_PREFIX};
