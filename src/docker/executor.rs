//! The external build executor boundary.
//!
//! Builds are delegated to a builder subprocess; this module defines the
//! minimal request/response contract the core needs and a `docker` CLI
//! implementation of it. The executor is assumed reliable from the core's
//! perspective: it either returns structured data or fails with captured
//! output. Timeouts and cancellation are a caller concern.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BuildError, RegistryError, Result, StevedoreError};
use crate::reference::ImageReference;

use super::registry::TagResolver;

/// A single build invocation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// The assembled build instructions (dockerfile text).
    pub instructions: String,
    /// The build context directory.
    pub context_dir: PathBuf,
    /// The reference to tag the result with (`name:tag`).
    pub target: String,
    /// Build arguments passed through to the builder.
    pub build_args: BTreeMap<String, String>,
    /// Daemon host to build against, if not the default.
    pub docker_host: Option<String>,
}

/// The structured result of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// The content id of the built image (`algorithm:hex`).
    pub image_id: String,
    /// The registry content digest, when the builder reported one.
    pub digest: Option<String>,
}

/// The capability surface of the external builder.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Runs a build and returns the resulting content id.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] carrying captured stdout/stderr when the
    /// builder cannot be started or exits with a failure.
    async fn build(&self, request: &BuildRequest) -> Result<BuildOutput>;

    /// Binds an additional reference to existing image content on the
    /// given daemon host (the executor default when `None`).
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] when the underlying command fails.
    async fn tag<'a>(&self, source: &str, target: &str, docker_host: Option<&'a str>)
    -> Result<()>;

    /// Pushes a reference to its registry from the given daemon host,
    /// returning the content digest when the registry reported one.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] when the underlying command fails.
    async fn push<'a>(
        &self,
        reference: &str,
        docker_host: Option<&'a str>,
    ) -> Result<Option<String>>;

    /// Removes an image reference from the given daemon host. Callers
    /// treat failures as best-effort teardown.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] when the underlying command fails.
    async fn remove_image<'a>(&self, reference: &str, docker_host: Option<&'a str>) -> Result<()>;
}

/// [`BuildExecutor`] over the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCliExecutor {
    binary: String,
    docker_host: Option<String>,
}

impl Default for DockerCliExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCliExecutor {
    /// Creates an executor using the `docker` binary on the path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: String::from("docker"),
            docker_host: None,
        }
    }

    /// Overrides the builder binary (e.g. `podman`).
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Sets the default daemon host for all invocations.
    #[must_use]
    pub fn with_docker_host(mut self, docker_host: impl Into<String>) -> Self {
        self.docker_host = Some(docker_host.into());
        self
    }

    /// Runs the CLI and captures its output, converting failures into
    /// build errors with full context.
    async fn run(&self, args: &[&str], docker_host: Option<&str>) -> Result<std::process::Output> {
        let rendered = format!("{} {}", self.binary, args.join(" "));
        debug!("Executing: {rendered}");

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(host) = docker_host.or(self.docker_host.as_deref()) {
            command.env("DOCKER_HOST", host);
        }

        let output = command
            .output()
            .await
            .map_err(|e| BuildError::spawn(&rendered, e))?;

        if !output.status.success() {
            return Err(BuildError::from_output(&rendered, &output).into());
        }
        Ok(output)
    }
}

#[async_trait]
impl BuildExecutor for DockerCliExecutor {
    async fn build(&self, request: &BuildRequest) -> Result<BuildOutput> {
        // The instructions are assembled in memory; hand them to the CLI
        // through a throwaway dockerfile.
        let dockerfile = std::env::temp_dir().join(format!("stevedore-{}.dockerfile", Uuid::new_v4()));
        tokio::fs::write(&dockerfile, &request.instructions).await?;

        let dockerfile_arg = dockerfile.to_string_lossy().into_owned();
        let context_arg = request.context_dir.to_string_lossy().into_owned();
        let mut args = vec![
            "build",
            "-q",
            "-t",
            request.target.as_str(),
            "-f",
            dockerfile_arg.as_str(),
        ];
        let build_args: Vec<String> = request
            .build_args
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        for build_arg in &build_args {
            args.push("--build-arg");
            args.push(build_arg.as_str());
        }
        args.push(context_arg.as_str());

        let result = self.run(&args, request.docker_host.as_deref()).await;

        if let Err(e) = tokio::fs::remove_file(&dockerfile).await {
            warn!("Failed to remove temporary dockerfile: {e}");
        }

        let output = result?;
        let image_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if image_id.is_empty() {
            return Err(BuildError::MissingImageId {
                target: request.target.clone(),
            }
            .into());
        }

        Ok(BuildOutput {
            image_id,
            digest: None,
        })
    }

    async fn tag<'a>(
        &self,
        source: &str,
        target: &str,
        docker_host: Option<&'a str>,
    ) -> Result<()> {
        self.run(&["tag", source, target], docker_host).await?;
        Ok(())
    }

    async fn push<'a>(
        &self,
        reference: &str,
        docker_host: Option<&'a str>,
    ) -> Result<Option<String>> {
        let output = self.run(&["push", reference], docker_host).await?;
        Ok(parse_push_digest(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn remove_image<'a>(&self, reference: &str, docker_host: Option<&'a str>) -> Result<()> {
        self.run(&["rmi", "-f", reference], docker_host).await?;
        Ok(())
    }
}

#[async_trait]
impl TagResolver for DockerCliExecutor {
    /// Resolves a reference against the daemon via `docker image inspect`.
    ///
    /// A missing image resolves to `None`; other inspect failures
    /// propagate.
    async fn resolve_id(&self, reference: &ImageReference) -> Result<Option<String>> {
        let Some(target) = reference
            .name_tag()
            .or_else(|| reference.id().map(str::to_string))
        else {
            return Err(StevedoreError::Registry(RegistryError::NotAddressable {
                reference: reference.to_string(),
            }));
        };

        let result = self
            .run(
                &["image", "inspect", "--format", "{{.Id}}", &target],
                reference.docker_host(),
            )
            .await;

        match result {
            Ok(output) => {
                let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
                Ok((!id.is_empty()).then_some(id))
            }
            Err(StevedoreError::Build(BuildError::ExecutorFailed { stderr, .. }))
                if stderr.contains("No such") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Extracts the content digest from `docker push` output.
fn parse_push_digest(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let (_, rest) = line.split_once("digest: ")?;
        rest.split_whitespace().next().map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_digest_is_parsed_from_output() {
        let stdout = "The push refers to repository [docker.io/library/app]\n\
                      v1: digest: sha256:deadbeef size: 1234\n";
        assert_eq!(
            parse_push_digest(stdout).as_deref(),
            Some("sha256:deadbeef")
        );
    }

    #[test]
    fn push_digest_absent_when_not_reported() {
        assert_eq!(parse_push_digest("nothing to see\n"), None);
    }

    #[test]
    fn executor_is_configurable() {
        let executor = DockerCliExecutor::new()
            .with_binary("podman")
            .with_docker_host("tcp://build-host:2375");
        assert_eq!(executor.binary, "podman");
        assert_eq!(executor.docker_host.as_deref(), Some("tcp://build-host:2375"));
    }
}
