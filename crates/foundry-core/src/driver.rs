//! Build driver contract.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::build::{BuildResult, BuildType, BuildUnit};
use crate::environment::StartedEnvironment;
use crate::repository::RepositoryHandle;
use crate::{Error, Result};

/// Runs builds inside a provisioned environment.
///
/// `start_build` kicks the build off and returns a completion channel; the
/// driver sends exactly one [`BuildResult`] on it. A dropped sender is
/// treated by the caller as a failed build.
#[async_trait]
pub trait BuildDriver: Send + Sync {
    /// Build kind this driver handles.
    fn build_type(&self) -> BuildType;

    async fn start_build(
        &self,
        unit: &BuildUnit,
        environment: &StartedEnvironment,
        workspace: &RepositoryHandle,
    ) -> Result<oneshot::Receiver<BuildResult>>;
}

/// Build drivers keyed by the build type they handle, resolved once at
/// construction.
#[derive(Clone)]
pub struct BuildDriverRegistry {
    drivers: Arc<HashMap<BuildType, Arc<dyn BuildDriver>>>,
}

impl BuildDriverRegistry {
    pub fn new(drivers: Vec<Arc<dyn BuildDriver>>) -> Self {
        let drivers = drivers
            .into_iter()
            .map(|driver| (driver.build_type(), driver))
            .collect();
        Self {
            drivers: Arc::new(drivers),
        }
    }

    pub fn resolve(&self, build_type: BuildType) -> Result<Arc<dyn BuildDriver>> {
        self.drivers
            .get(&build_type)
            .cloned()
            .ok_or_else(|| Error::NoCompatibleDriver(build_type.to_string()))
    }
}
