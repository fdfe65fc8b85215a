//! Build units, collections and results.
//!
//! A [`BuildUnit`] is one project's build configuration together with its
//! declared dependencies on other units. Units are immutable once submitted
//! to a scheduling run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ResourceId;
use crate::environment::{DebugOptions, ImageType};

/// Kind of build a unit requires; used to pick a compatible build driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    Java,
    Native,
    Docker,
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildType::Java => write!(f, "java"),
            BuildType::Native => write!(f, "native"),
            BuildType::Docker => write!(f, "docker"),
        }
    }
}

/// The environment a unit builds in: which driver kind, and which image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEnvironment {
    pub build_type: BuildType,
    /// Image identifier within the image repository.
    pub image_id: String,
    /// Base URL of the image repository the image is pulled from.
    pub image_repository_url: String,
    pub image_type: ImageType,
}

/// A project build configuration and its declared dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildUnit {
    pub id: ResourceId,
    pub name: String,
    /// Script executed by the build driver inside the environment.
    pub build_script: String,
    pub environment: BuildEnvironment,
    /// Units that must build successfully before this one may start.
    pub dependencies: Vec<ResourceId>,
    #[serde(default)]
    pub debug: DebugOptions,
}

impl BuildUnit {
    pub fn new(name: impl Into<String>, build_script: impl Into<String>, environment: BuildEnvironment) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
            build_script: build_script.into(),
            environment,
            dependencies: Vec::new(),
            debug: DebugOptions::default(),
        }
    }

    /// Declare a dependency on another unit.
    pub fn depends_on(mut self, other: &BuildUnit) -> Self {
        self.dependencies.push(other.id);
        self
    }
}

/// Identity of the collection a run builds against (product/version scope).
/// Repositories created for a run are scoped to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildCollection {
    pub id: ResourceId,
    pub name: String,
}

impl BuildCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
        }
    }
}

/// Final status of one build attempt as reported by the build driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Failed,
    /// The driver itself broke, as opposed to the build script failing.
    SystemError,
}

impl BuildStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Success)
    }
}

/// Reference to an artifact produced by a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub identifier: String,
    /// Location within the build repository the artifact was deployed to.
    pub location: String,
}

/// Outcome of one build attempt, produced by the build driver's completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    /// Identity of this build record.
    pub build_id: ResourceId,
    /// The unit this build was for.
    pub unit_id: ResourceId,
    pub status: BuildStatus,
    pub artifacts: Vec<ArtifactRef>,
    /// Reference to the captured build log, if any.
    pub build_log: Option<String>,
    /// Driver-reported detail, set on failure.
    pub message: Option<String>,
    pub completed_at: DateTime<Utc>,
    /// Free-form attributes attached after the fact (e.g. release tracking).
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl BuildResult {
    pub fn new(unit_id: ResourceId, status: BuildStatus) -> Self {
        Self {
            build_id: ResourceId::new(),
            unit_id,
            status,
            artifacts: Vec::new(),
            build_log: None,
            message: None,
            completed_at: Utc::now(),
            attributes: HashMap::new(),
        }
    }
}
