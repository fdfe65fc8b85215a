//! Repository manager contract.
//!
//! The repository manager creates isolated artifact repositories/workspaces
//! per build and promotes produced artifacts once a build completes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::build::{BuildCollection, BuildResult, BuildUnit};
use crate::{ResourceId, Result};

/// Handle to an isolated build repository/workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryHandle {
    pub id: ResourceId,
    /// Unit this repository was created for.
    pub unit_id: ResourceId,
    /// Collection the repository is scoped to.
    pub collection_id: ResourceId,
    /// URL builds resolve dependencies from and deploy artifacts to.
    pub connection_url: String,
}

/// Manages per-build artifact repositories.
#[async_trait]
pub trait RepositoryManager: Send + Sync {
    /// Create an isolated repository scoped to one unit and the run's
    /// collection.
    async fn create_repository(
        &self,
        unit: &BuildUnit,
        collection: &BuildCollection,
    ) -> Result<RepositoryHandle>;

    /// Promote the artifacts a build deployed into its repository.
    async fn persist_artifacts(
        &self,
        repository: &RepositoryHandle,
        result: &BuildResult,
    ) -> Result<()>;
}
