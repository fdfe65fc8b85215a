//! Datastore contract.

use async_trait::async_trait;

use crate::build::BuildResult;
use crate::{ResourceId, Result};

/// Persistence for completed builds. Fire-and-forget from the orchestrator's
/// perspective; storage failures are logged, not retried.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn store_completed_build(&self, result: &BuildResult) -> Result<()>;

    /// Attach a free-form attribute to an already stored build record.
    async fn add_build_attribute(
        &self,
        build_id: ResourceId,
        key: &str,
        value: &str,
    ) -> Result<()>;
}
