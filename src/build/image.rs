//! The build-capable image resource.
//!
//! An [`ImageBuildResource`] participates in reconciliation through the
//! change capability and owns the cache state that makes repeated
//! deployment operations cheap: a fingerprint over its declared build
//! inputs decides whether the cached image is still valid, and unique-tag
//! deduplication keeps registry tag counts bounded when content does not
//! change across operations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::docker::{BuildExecutor, BuildRequest, TagResolver};
use crate::error::{BuildError, Result, StevedoreError};
use crate::reconcile::{ActDecision, ActionContext, ChangeAction, ChangeType, ResourceNode};
use crate::reference::{ImageReference, ImageReferenceBuilder, DEFAULT_TAG};

use super::fingerprint::Fingerprinter;
use super::state::BuildCacheState;
use super::tags::{unique_tag, SuffixSource, UuidSuffixSource, UNIQUE_SUFFIX_LEN};

/// Name of the synthetic stage carrying ad hoc file content.
const FILES_STAGE: &str = "files";

/// Instructions for the throwaway files image: exactly the injected
/// content, nothing else, so the main build can use the builder's native
/// layer copy instead of ad hoc injection.
const FILES_DOCKERFILE: &str = "FROM scratch\nCOPY . /\n";

/// An extra named build stage prepended to the declared instructions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildStage {
    /// The stage name referenced by `COPY --from=<name>`.
    pub name: String,
    /// The stage's build instructions, starting with its `FROM` line.
    pub instructions: String,
}

/// Ad hoc file content injected into the build via the files stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdHocFile {
    /// Destination path of the file inside the files stage.
    pub dest: String,
    /// The file contents.
    pub contents: String,
}

/// Declared, build-affecting properties of an image resource.
///
/// Everything here is part of the build fingerprint; the resource's
/// identity (its node id) deliberately is not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSpec {
    /// The image name, optionally carrying a registry domain
    /// (`"app"`, `"team/app"`, `"registry.example.com/team/app"`).
    pub image_name: String,
    /// The declared base tag; defaults to `latest`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Whether to mint uniquely suffixed tags instead of reusing the
    /// base tag.
    #[serde(default)]
    pub unique_tag: bool,
    /// The declared build instructions (dockerfile text).
    pub dockerfile: String,
    /// The build context directory.
    pub context_dir: PathBuf,
    /// Build arguments.
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    /// Extra named stages prepended to the declared instructions.
    #[serde(default)]
    pub extra_stages: Vec<BuildStage>,
    /// Ad hoc file content injected through the synthetic files stage.
    #[serde(default)]
    pub extra_files: Vec<AdHocFile>,
    /// Daemon host to build against instead of pushing to a registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_host: Option<String>,
}

impl ImageSpec {
    /// The declared base tag, defaulting to `latest`.
    #[must_use]
    pub fn base_tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }
}

/// A resource node whose realization step is a container image build.
pub struct ImageBuildResource {
    node_id: String,
    spec: ImageSpec,
    executor: Arc<dyn BuildExecutor>,
    resolver: Arc<dyn TagResolver>,
    suffixes: Arc<dyn SuffixSource>,
    fingerprinter: Fingerprinter,
    fingerprint: OnceLock<String>,
    state: RwLock<Option<BuildCacheState>>,
}

impl ImageBuildResource {
    /// Creates a resource with no prior build state.
    #[must_use]
    pub fn new(
        node_id: impl Into<String>,
        spec: ImageSpec,
        executor: Arc<dyn BuildExecutor>,
        resolver: Arc<dyn TagResolver>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            spec,
            executor,
            resolver,
            suffixes: Arc::new(UuidSuffixSource),
            fingerprinter: Fingerprinter::new(),
            fingerprint: OnceLock::new(),
            state: RwLock::new(None),
        }
    }

    /// Replaces the tag suffix source (deterministic sources for tests).
    #[must_use]
    pub fn with_suffix_source(mut self, suffixes: Arc<dyn SuffixSource>) -> Self {
        self.suffixes = suffixes;
        self
    }

    /// Restores cache state persisted from a previous deployment
    /// operation.
    #[must_use]
    pub fn with_state(self, state: BuildCacheState) -> Self {
        *self.state_mut() = Some(state);
        self
    }

    /// The declared build properties.
    #[must_use]
    pub const fn spec(&self) -> &ImageSpec {
        &self.spec
    }

    /// A snapshot of the cache state, for persistence by the embedding
    /// system.
    #[must_use]
    pub fn cache_state(&self) -> Option<BuildCacheState> {
        self.state_ref().clone()
    }

    /// The fingerprint of the declared build inputs, memoized per
    /// instance.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError::Fingerprint`] if the spec cannot be
    /// serialized.
    pub fn fingerprint(&self) -> Result<String> {
        if let Some(fingerprint) = self.fingerprint.get() {
            return Ok(fingerprint.clone());
        }
        let fingerprint = self.fingerprinter.fingerprint(&self.spec)?;
        Ok(self.fingerprint.get_or_init(|| fingerprint).clone())
    }

    /// The cached image, if it is valid for the current operation and the
    /// current declaration.
    ///
    /// Valid means: a build exists, it was produced by this deployment
    /// operation, and its input fingerprint matches the current one. The
    /// operation check forces at least one rebuild per deployment
    /// operation, covering externally caused drift; the fingerprint check
    /// invalidates immediately on any declared-input change.
    ///
    /// # Errors
    ///
    /// Propagates fingerprint computation failures.
    pub fn image(&self, ctx: &ActionContext) -> Result<Option<ImageReference>> {
        let fingerprint = self.fingerprint()?;
        Ok(self
            .state_ref()
            .as_ref()
            .filter(|state| state.deploy_operation_id == ctx.deploy_operation_id())
            .filter(|state| state.input_fingerprint == fingerprint)
            .map(|state| state.built_image.clone()))
    }

    /// The most recently built image, regardless of operation or
    /// fingerprint validity.
    ///
    /// Dependents that only need "something buildable exists" use this
    /// instead of [`ImageBuildResource::image`].
    #[must_use]
    pub fn latest_image(&self) -> Option<ImageReference> {
        self.state_ref().as_ref().map(|state| state.built_image.clone())
    }

    /// Republishes the latest build to another registry location.
    ///
    /// # Errors
    ///
    /// Fails when no build exists yet, the location does not parse, or
    /// the tag/push commands fail.
    pub async fn push_to(
        &self,
        registry_location: &str,
        new_tag: Option<&str>,
    ) -> Result<ImageReference> {
        let latest = self
            .latest_image()
            .ok_or_else(|| BuildError::NoBuildAvailable {
                name: self.spec.image_name.clone(),
            })?;
        let source = latest
            .name_tag()
            .or_else(|| latest.id().map(str::to_string))
            .ok_or_else(|| {
                StevedoreError::internal("latest build carries neither name:tag nor id")
            })?;

        let tag = new_tag
            .map(str::to_string)
            .or_else(|| latest.tag().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_TAG.to_string());
        let target_ref = ImageReferenceBuilder::parse_familiar(registry_location)?
            .tag(tag)
            .freeze()?;
        let target = target_ref
            .name_tag()
            .ok_or_else(|| StevedoreError::internal("push target has no name:tag form"))?;

        info!("Pushing '{source}' to '{target}'");
        self.executor
            .tag(&source, &target, self.spec.docker_host.as_deref())
            .await?;
        let digest = self
            .executor
            .push(&target, self.spec.docker_host.as_deref())
            .await?;

        match digest {
            Some(digest) => target_ref.to_builder().digest(digest).freeze(),
            None => Ok(target_ref),
        }
    }

    /// Runs the build algorithm and commits the cache state.
    async fn build(&self, ctx: &ActionContext) -> Result<ImageReference> {
        let fingerprint = self.fingerprint()?;
        info!("Building image '{}'", self.spec.image_name);

        // Ad hoc file content goes through a throwaway image so the main
        // build can copy it with a native layer copy.
        let mut stages: Vec<BuildStage> = Vec::new();
        let mut files_image: Option<String> = None;
        if !self.spec.extra_files.is_empty() {
            let tag = self.build_files_image(ctx).await?;
            stages.push(BuildStage {
                name: FILES_STAGE.to_string(),
                instructions: format!("FROM {tag} AS {FILES_STAGE}"),
            });
            files_image = Some(tag);
        }
        stages.extend(self.spec.extra_stages.iter().cloned());

        let instructions = assemble_instructions(&stages, &self.spec.dockerfile);

        let base = self.base_reference()?;
        let build_target = base
            .clone()
            .tag(self.spec.base_tag())
            .freeze()?
            .name_tag()
            .ok_or_else(|| StevedoreError::internal("build target has no name:tag form"))?;

        let build_result = self
            .executor
            .build(&BuildRequest {
                instructions,
                context_dir: self.spec.context_dir.clone(),
                target: build_target.clone(),
                build_args: self.spec.build_args.clone(),
                docker_host: self.spec.docker_host.clone(),
            })
            .await;

        // The files image served its purpose once the main build ran.
        if let Some(tag) = files_image {
            if let Err(e) = self
                .executor
                .remove_image(&tag, self.spec.docker_host.as_deref())
                .await
            {
                warn!("Failed to remove files stage image '{tag}': {e}");
            }
        }
        let output = build_result?;

        let registry_backed = self.spec.docker_host.is_none();
        let (final_tag, pushed_digest) = if self.spec.unique_tag {
            match self.reusable_previous_tag(&base, &output.image_id).await {
                Some(previous) => {
                    info!("Reusing unique tag '{previous}': content unchanged");
                    // The content was not re-pushed; its digest is the one
                    // recorded for the previous build.
                    let digest = self
                        .state_ref()
                        .as_ref()
                        .and_then(|state| state.built_image.digest().map(str::to_string));
                    (previous, digest)
                }
                None => {
                    let minted = unique_tag(self.spec.base_tag(), self.suffixes.as_ref());
                    let target = base
                        .clone()
                        .tag(minted.clone())
                        .freeze()?
                        .name_tag()
                        .ok_or_else(|| {
                            StevedoreError::internal("unique tag target has no name:tag form")
                        })?;
                    debug!("Minted unique tag '{minted}'");
                    self.executor
                        .tag(&build_target, &target, self.spec.docker_host.as_deref())
                        .await?;
                    let digest = if registry_backed {
                        self.executor
                            .push(&target, self.spec.docker_host.as_deref())
                            .await?
                    } else {
                        None
                    };
                    (minted, digest)
                }
            }
        } else {
            let digest = if registry_backed {
                self.executor
                    .push(&build_target, self.spec.docker_host.as_deref())
                    .await?
            } else {
                None
            };
            (self.spec.base_tag().to_string(), digest)
        };

        let mut built_builder = base.tag(final_tag.clone()).id(output.image_id.clone());
        if let Some(digest) = pushed_digest.or(output.digest) {
            built_builder = built_builder.digest(digest);
        }
        let built = built_builder.freeze()?;

        // All validity-bearing fields commit in one update.
        let new_state = BuildCacheState::new(
            ctx.deploy_operation_id(),
            built.clone(),
            fingerprint,
            self.spec.unique_tag.then(|| final_tag),
        );
        *self.state_mut() = Some(new_state);

        info!(
            "Built image '{}' ({})",
            built.familiar().unwrap_or_else(|| built.to_string()),
            output.image_id
        );
        Ok(built)
    }

    /// Builds the throwaway image carrying the injected file content and
    /// returns its unique tag.
    async fn build_files_image(&self, ctx: &ActionContext) -> Result<String> {
        let suffix = self.suffixes.suffix(UNIQUE_SUFFIX_LEN);
        let stage_dir = ctx.working_dir().join(format!("files-{suffix}"));
        tokio::fs::create_dir_all(&stage_dir).await?;

        for file in &self.spec.extra_files {
            let dest = stage_dir.join(file.dest.trim_start_matches('/'));
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, &file.contents).await?;
        }

        let target = format!("{}-files:{suffix}", self.spec.image_name);
        debug!("Building files stage image '{target}'");

        let result = self
            .executor
            .build(&BuildRequest {
                instructions: FILES_DOCKERFILE.to_string(),
                context_dir: stage_dir.clone(),
                target: target.clone(),
                build_args: BTreeMap::new(),
                docker_host: self.spec.docker_host.clone(),
            })
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(&stage_dir).await {
            warn!("Failed to remove files stage directory: {e}");
        }
        result?;

        Ok(target)
    }

    /// The previous unique tag, if it may be reused for the just-built
    /// content.
    ///
    /// Reusable means: a previous unique tag exists, it targeted the same
    /// registry/host domain (tags are not comparable across domains), and
    /// it still points at the content that was just built. Daemon-backed
    /// resolvers answer in image ids; registry-backed resolvers answer in
    /// manifest digests, a different namespace from the builder's image
    /// id, so a resolved value is also accepted when it equals the digest
    /// recorded for the previous build and the builder reproduced that
    /// build's exact image id. An unresolvable previous tag is a cache
    /// miss, not an error: the tag may legitimately have been deleted
    /// externally.
    async fn reusable_previous_tag(
        &self,
        base: &ImageReferenceBuilder,
        new_id: &str,
    ) -> Option<String> {
        let state = self.state_ref().clone()?;
        let previous_tag = state.previous_unique_tag?;

        let current = base.clone().freeze().ok()?;
        if state.built_image.domain() != current.domain()
            || state.built_image.docker_host() != current.docker_host()
        {
            debug!("Previous unique tag targeted a different domain, minting a new tag");
            return None;
        }

        let unchanged = |resolved: &str| {
            resolved == new_id
                || (state.built_image.digest() == Some(resolved)
                    && state.built_image.id() == Some(new_id))
        };

        let previous_ref = base.clone().tag(previous_tag.clone()).freeze().ok()?;
        match self.resolver.resolve_id(&previous_ref).await {
            Ok(Some(resolved)) if unchanged(&resolved) => Some(previous_tag),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to resolve previous tag '{previous_tag}', minting a new one: {e}");
                None
            }
        }
    }

    /// The builder holding this resource's name fields (no tag yet).
    fn base_reference(&self) -> Result<ImageReferenceBuilder> {
        if let Some(host) = &self.spec.docker_host {
            return Ok(ImageReferenceBuilder::new()
                .docker_host(host)
                .path(self.spec.image_name.clone()));
        }
        // Tags are assigned per build; the declared name is name-only.
        Ok(ImageReferenceBuilder::parse_familiar(&self.spec.image_name)?.clear_tag())
    }

    fn state_ref(&self) -> RwLockReadGuard<'_, Option<BuildCacheState>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, Option<BuildCacheState>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResourceNode for ImageBuildResource {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn kind_name(&self) -> &'static str {
        "image"
    }

    fn as_change_action(&self) -> Option<&dyn ChangeAction> {
        Some(self)
    }
}

#[async_trait]
impl ChangeAction for ImageBuildResource {
    async fn should_act(
        &self,
        op: ChangeType,
        ctx: &ActionContext,
    ) -> Result<Option<ActDecision>> {
        // Image lifecycle is not managed by this resource; deleting the
        // declaring node leaves the image behind.
        if op == ChangeType::Delete {
            return Ok(None);
        }

        if self.image(ctx)?.is_some() {
            Ok(Some(ActDecision::skip(format!(
                "Image '{}' is up to date",
                self.spec.image_name
            ))))
        } else {
            Ok(Some(ActDecision::act(format!(
                "Building image '{}'",
                self.spec.image_name
            ))))
        }
    }

    async fn action(&self, _op: ChangeType, ctx: &ActionContext) -> Result<()> {
        self.build(ctx).await?;
        Ok(())
    }
}

/// Prepends extra stages to the declared build instructions.
fn assemble_instructions(stages: &[BuildStage], dockerfile: &str) -> String {
    let mut out = String::new();
    for stage in stages {
        out.push_str(stage.instructions.trim_end());
        out.push_str("\n\n");
    }
    out.push_str(dockerfile);
    out
}
