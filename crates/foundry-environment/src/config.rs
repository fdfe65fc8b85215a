//! Environment driver configuration.

use foundry_core::environment::ImageType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`PooledEnvironmentDriver`](crate::PooledEnvironmentDriver).
///
/// Loaded by the surrounding service; everything has a sensible default so a
/// bare `{}` document is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentDriverConfig {
    /// Administratively disable the driver; `can_provision` is then always
    /// false.
    pub disabled: bool,
    /// Size of the worker pool backing provisioning, independent of the
    /// orchestrator's build-concurrency bound.
    pub worker_pool_size: usize,
    /// Delay between readiness checks.
    pub poll_interval_millis: u64,
    /// Ceiling on the total time spent waiting for readiness.
    pub max_ready_wait_secs: u64,
    /// Image kinds this driver accepts.
    pub compatible_image_types: Vec<ImageType>,
}

impl Default for EnvironmentDriverConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            worker_pool_size: 4,
            poll_interval_millis: 1_000,
            max_ready_wait_secs: 300,
            compatible_image_types: vec![ImageType::DockerImage],
        }
    }
}

impl EnvironmentDriverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    pub fn max_ready_wait(&self) -> Duration {
        Duration::from_secs(self.max_ready_wait_secs)
    }
}
