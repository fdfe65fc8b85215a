//! Environment provisioning contracts.
//!
//! An [`EnvironmentDriver`] brings up isolated build environments
//! asynchronously. `start_environment` returns immediately with a
//! [`StartedEnvironment`] handle; readiness is observed through the handle's
//! state channel, fed by the driver's own polling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::repository::RepositoryHandle;
use crate::{Error, ResourceId, Result};

/// Kind of system image an environment is provisioned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    DockerImage,
    VirtualMachine,
    LocalWorkspace,
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageType::DockerImage => write!(f, "docker_image"),
            ImageType::VirtualMachine => write!(f, "virtual_machine"),
            ImageType::LocalWorkspace => write!(f, "local_workspace"),
        }
    }
}

/// Debug settings forwarded to the environment backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugOptions {
    /// Keep the environment open for inspection when the build fails.
    pub enabled: bool,
}

/// Everything a driver needs to bring up one environment.
#[derive(Debug, Clone)]
pub struct EnvironmentSpec {
    pub image_id: String,
    pub image_repository_url: String,
    pub image_type: ImageType,
    /// Repository/workspace the environment builds against.
    pub workspace: RepositoryHandle,
    pub debug: DebugOptions,
    /// Token the environment uses to call back into the coordinator.
    pub access_token: Option<String>,
}

/// Why provisioning did not reach `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningFailure {
    /// The readiness ceiling elapsed before the environment came up.
    TimedOut(Duration),
    /// The backend reported an unrecoverable condition.
    Error(String),
}

/// Lifecycle of a provisioned environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentState {
    /// Provisioning request accepted, backend resources not yet created.
    Starting,
    /// Backend resources exist; waiting for services to come up.
    Running,
    Ready,
    Failed(ProvisioningFailure),
    Destroyed,
}

impl EnvironmentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnvironmentState::Ready | EnvironmentState::Failed(_) | EnvironmentState::Destroyed
        )
    }
}

/// Handle to a provisioned, possibly not-yet-ready build environment.
///
/// State transitions are published by the owning driver on a watch channel;
/// the cancellation token stops any in-flight readiness polling when the
/// handle is destroyed.
#[derive(Debug, Clone)]
pub struct StartedEnvironment {
    id: ResourceId,
    /// Fully resolved image reference (repository URL joined with image id).
    image: String,
    state: watch::Receiver<EnvironmentState>,
    cancel: CancellationToken,
}

impl StartedEnvironment {
    pub fn new(
        id: ResourceId,
        image: String,
        state: watch::Receiver<EnvironmentState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            image,
            state,
            cancel,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Current provisioning state.
    pub fn state(&self) -> EnvironmentState {
        self.state.borrow().clone()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait until the environment is ready to run builds.
    ///
    /// Resolves with an error if provisioning failed, timed out, or the
    /// environment was destroyed before becoming ready.
    pub async fn await_ready(&self) -> Result<()> {
        let mut state = self.state.clone();
        loop {
            let current = state.borrow_and_update().clone();
            match current {
                EnvironmentState::Ready => return Ok(()),
                EnvironmentState::Failed(ProvisioningFailure::TimedOut(wait)) => {
                    return Err(Error::ProvisioningTimeout(wait));
                }
                EnvironmentState::Failed(ProvisioningFailure::Error(message)) => {
                    return Err(Error::ProvisioningFailed(message));
                }
                EnvironmentState::Destroyed => {
                    return Err(Error::ProvisioningFailed(
                        "environment destroyed before becoming ready".to_string(),
                    ));
                }
                EnvironmentState::Starting | EnvironmentState::Running => {}
            }
            if state.changed().await.is_err() {
                return Err(Error::ProvisioningFailed(
                    "environment driver dropped the state channel".to_string(),
                ));
            }
        }
    }
}

/// Driver that provisions isolated build environments.
#[async_trait]
pub trait EnvironmentDriver: Send + Sync {
    /// Whether this driver supports the requested image kind.
    /// Always false for an administratively disabled driver.
    fn can_provision(&self, image_type: ImageType) -> bool;

    /// Start provisioning an environment. Non-blocking: the returned handle
    /// starts in [`EnvironmentState::Starting`] and progresses asynchronously.
    fn start_environment(&self, spec: EnvironmentSpec) -> Result<StartedEnvironment>;

    /// Tear the environment down and cancel any in-flight readiness polling.
    /// Idempotent; safe on already-failed or already-destroyed handles.
    async fn destroy(&self, environment: &StartedEnvironment) -> Result<()>;

    /// Stop accepting new starts, interrupt in-flight provisioning and tear
    /// down every outstanding environment.
    async fn shutdown(&self);
}

/// Resolves an image type to a compatible environment driver.
#[derive(Clone)]
pub struct EnvironmentDriverRegistry {
    drivers: Vec<Arc<dyn EnvironmentDriver>>,
}

impl EnvironmentDriverRegistry {
    pub fn new(drivers: Vec<Arc<dyn EnvironmentDriver>>) -> Self {
        Self { drivers }
    }

    /// First registered driver that can provision the given image type.
    pub fn resolve(&self, image_type: ImageType) -> Result<Arc<dyn EnvironmentDriver>> {
        self.drivers
            .iter()
            .find(|driver| driver.can_provision(image_type))
            .cloned()
            .ok_or_else(|| Error::NoCompatibleDriver(image_type.to_string()))
    }
}
