//! Build-artifact caching for expensive image builds.

mod fingerprint;
mod image;
mod state;
mod tags;

pub use fingerprint::Fingerprinter;
pub use image::{AdHocFile, BuildStage, ImageBuildResource, ImageSpec};
pub use state::BuildCacheState;
pub use tags::{unique_tag, SuffixSource, UuidSuffixSource, UNIQUE_SUFFIX_LEN};
