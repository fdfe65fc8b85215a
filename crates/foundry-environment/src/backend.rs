//! Backend contract for concrete environment implementations.
//!
//! The driver owns scheduling, pooling and readiness polling; a backend only
//! knows how to create, health-check and tear down one environment against
//! its platform (a container orchestrator, a VM pool, a local sandbox).

use async_trait::async_trait;
use foundry_core::environment::EnvironmentSpec;
use foundry_core::{ResourceId, Result};

/// Outcome of a single readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Ready,
    /// Not up yet; the monitor reschedules the next check.
    NotReady,
    /// Unrecoverable; provisioning fails without further checks.
    Failed(String),
}

/// Platform-specific environment operations, keyed by the environment id the
/// driver assigned at start.
#[async_trait]
pub trait EnvironmentBackend: Send + Sync {
    /// Bring up the environment's resources. Returning does not imply the
    /// environment is ready to accept builds; readiness is polled separately.
    async fn create(
        &self,
        environment_id: ResourceId,
        image: &str,
        spec: &EnvironmentSpec,
    ) -> Result<()>;

    /// One readiness probe.
    async fn health(&self, environment_id: ResourceId) -> Health;

    /// Tear the environment's resources down. Must tolerate an environment
    /// that was never fully created.
    async fn teardown(&self, environment_id: ResourceId) -> Result<()>;
}
