//! Thin wrappers around the external build and registry boundaries.

mod executor;
mod registry;

pub use executor::{BuildExecutor, BuildOutput, BuildRequest, DockerCliExecutor};
pub use registry::{RegistryResolver, TagResolver};

#[cfg(test)]
pub use executor::MockBuildExecutor;
#[cfg(test)]
pub use registry::MockTagResolver;
