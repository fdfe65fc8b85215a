//! Milestone release recording.
//!
//! Closing a milestone hands the released builds to an external process
//! engine and, once that process completes, tags each successfully imported
//! build record with its external tracking id and link.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{info, warn};

use foundry_core::datastore::Datastore;
use foundry_core::{Error, ResourceId, Result};

/// Attribute key the external build id is recorded under.
pub const RELEASE_TRACKING_ID_ATTRIBUTE: &str = "release.tracking-id";
/// Attribute key the external build link is recorded under.
pub const RELEASE_LINK_ATTRIBUTE: &str = "release.link";

/// Release of one milestone's builds to an external system.
#[derive(Debug, Clone)]
pub struct MilestoneReleaseRequest {
    pub milestone_id: ResourceId,
    /// Version string of the milestone being closed, e.g. `1.2.0.CR1`.
    pub milestone_version: String,
    /// Build records included in the release.
    pub builds: Vec<ResourceId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Success,
    Failed,
}

/// Import outcome for one build within a release.
#[derive(Debug, Clone, Serialize)]
pub struct ReleasedBuild {
    pub build_id: ResourceId,
    pub status: ReleaseStatus,
    /// Identifier assigned by the external system.
    pub tracking_id: Option<String>,
    /// Resolved link to the imported build.
    pub link: Option<String>,
    pub message: Option<String>,
}

/// Completion payload of one release process.
#[derive(Debug, Clone, Serialize)]
pub struct MilestoneReleaseResult {
    pub milestone_id: ResourceId,
    pub status: ReleaseStatus,
    pub message: Option<String>,
    pub builds: Vec<ReleasedBuild>,
}

/// External engine that runs the release process asynchronously.
///
/// `start_release` returns immediately with a completion channel; the engine
/// sends exactly one [`MilestoneReleaseResult`] on it when the process ends.
#[async_trait]
pub trait ProcessEngine: Send + Sync {
    async fn start_release(
        &self,
        request: &MilestoneReleaseRequest,
    ) -> Result<oneshot::Receiver<MilestoneReleaseResult>>;
}

/// Drives a milestone release and writes the outcome back onto the build
/// records.
///
/// Recording happens at most once per milestone: a completion for an already
/// recorded milestone is logged and dropped.
pub struct MilestoneReleaseRecorder {
    engine: Arc<dyn ProcessEngine>,
    datastore: Arc<dyn Datastore>,
    recorded: Mutex<HashSet<ResourceId>>,
}

impl MilestoneReleaseRecorder {
    pub fn new(engine: Arc<dyn ProcessEngine>, datastore: Arc<dyn Datastore>) -> Self {
        Self {
            engine,
            datastore,
            recorded: Mutex::new(HashSet::new()),
        }
    }

    /// Start the release process and record its result once it completes.
    pub async fn run_release(
        &self,
        request: MilestoneReleaseRequest,
    ) -> Result<MilestoneReleaseResult> {
        info!(
            milestone = %request.milestone_version,
            builds = request.builds.len(),
            "starting milestone release"
        );
        let completion = self.engine.start_release(&request).await?;
        let result = completion.await.map_err(|_| {
            Error::Internal("process engine dropped the release completion channel".to_string())
        })?;
        self.record(&result).await;
        Ok(result)
    }

    /// Write tracking attributes for every successfully imported build.
    /// No-op for a milestone that has already been recorded.
    pub async fn record(&self, result: &MilestoneReleaseResult) {
        {
            let mut recorded = self
                .recorded
                .lock()
                .expect("release recorder lock poisoned");
            // Claimed before writing, so a racing duplicate never records.
            if !recorded.insert(result.milestone_id) {
                warn!(
                    milestone_id = %result.milestone_id,
                    "duplicate release completion ignored"
                );
                return;
            }
        }

        for build in &result.builds {
            if build.status != ReleaseStatus::Success {
                warn!(
                    build_id = %build.build_id,
                    message = build.message.as_deref().unwrap_or("no detail"),
                    "build not imported by the release process"
                );
                continue;
            }
            if let Some(tracking_id) = &build.tracking_id {
                if let Err(error) = self
                    .datastore
                    .add_build_attribute(build.build_id, RELEASE_TRACKING_ID_ATTRIBUTE, tracking_id)
                    .await
                {
                    warn!(build_id = %build.build_id, %error, "failed to record release tracking id");
                }
            }
            if let Some(link) = &build.link {
                if let Err(error) = self
                    .datastore
                    .add_build_attribute(build.build_id, RELEASE_LINK_ATTRIBUTE, link)
                    .await
                {
                    warn!(build_id = %build.build_id, %error, "failed to record release link");
                }
            }
        }
        info!(
            milestone_id = %result.milestone_id,
            status = ?result.status,
            "milestone release recorded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundry_core::build::BuildResult;

    struct ScriptedEngine {
        result: Mutex<Option<MilestoneReleaseResult>>,
    }

    impl ScriptedEngine {
        fn completing_with(result: MilestoneReleaseResult) -> Self {
            Self {
                result: Mutex::new(Some(result)),
            }
        }

        fn dropping_channel() -> Self {
            Self {
                result: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ProcessEngine for ScriptedEngine {
        async fn start_release(
            &self,
            _request: &MilestoneReleaseRequest,
        ) -> Result<oneshot::Receiver<MilestoneReleaseResult>> {
            let (tx, rx) = oneshot::channel();
            if let Some(result) = self.result.lock().unwrap().take() {
                let _ = tx.send(result);
            }
            Ok(rx)
        }
    }

    #[derive(Default)]
    struct AttributeRecordingDatastore {
        attributes: Mutex<Vec<(ResourceId, String, String)>>,
    }

    #[async_trait]
    impl Datastore for AttributeRecordingDatastore {
        async fn store_completed_build(&self, _result: &BuildResult) -> Result<()> {
            Ok(())
        }

        async fn add_build_attribute(
            &self,
            build_id: ResourceId,
            key: &str,
            value: &str,
        ) -> Result<()> {
            self.attributes
                .lock()
                .unwrap()
                .push((build_id, key.to_string(), value.to_string()));
            Ok(())
        }
    }

    fn released(build_id: ResourceId, status: ReleaseStatus) -> ReleasedBuild {
        ReleasedBuild {
            build_id,
            status,
            tracking_id: Some("ext-4711".to_string()),
            link: Some("https://koji.example.com/build/4711".to_string()),
            message: None,
        }
    }

    fn request(builds: &[ResourceId]) -> MilestoneReleaseRequest {
        MilestoneReleaseRequest {
            milestone_id: ResourceId::new(),
            milestone_version: "1.2.0.CR1".to_string(),
            builds: builds.to_vec(),
        }
    }

    #[tokio::test]
    async fn successful_release_records_tracking_attributes() {
        let imported = ResourceId::new();
        let rejected = ResourceId::new();
        let result = MilestoneReleaseResult {
            milestone_id: ResourceId::new(),
            status: ReleaseStatus::Success,
            message: None,
            builds: vec![
                released(imported, ReleaseStatus::Success),
                ReleasedBuild {
                    message: Some("checksum mismatch".to_string()),
                    ..released(rejected, ReleaseStatus::Failed)
                },
            ],
        };
        let datastore = Arc::new(AttributeRecordingDatastore::default());
        let recorder = MilestoneReleaseRecorder::new(
            Arc::new(ScriptedEngine::completing_with(result)),
            datastore.clone(),
        );

        let outcome = recorder
            .run_release(request(&[imported, rejected]))
            .await
            .unwrap();

        assert_eq!(outcome.status, ReleaseStatus::Success);
        let attributes = datastore.attributes.lock().unwrap().clone();
        // Only the imported build is tagged, with both attributes.
        assert_eq!(attributes.len(), 2);
        assert!(attributes.iter().all(|(id, _, _)| *id == imported));
        assert!(
            attributes
                .iter()
                .any(|(_, key, value)| key == RELEASE_TRACKING_ID_ATTRIBUTE && value == "ext-4711")
        );
        assert!(
            attributes
                .iter()
                .any(|(_, key, _)| key == RELEASE_LINK_ATTRIBUTE)
        );
    }

    #[tokio::test]
    async fn duplicate_completion_records_once() {
        let build = ResourceId::new();
        let result = MilestoneReleaseResult {
            milestone_id: ResourceId::new(),
            status: ReleaseStatus::Success,
            message: None,
            builds: vec![released(build, ReleaseStatus::Success)],
        };
        let datastore = Arc::new(AttributeRecordingDatastore::default());
        let recorder = MilestoneReleaseRecorder::new(
            Arc::new(ScriptedEngine::completing_with(result.clone())),
            datastore.clone(),
        );

        recorder.record(&result).await;
        recorder.record(&result).await;

        assert_eq!(datastore.attributes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dropped_completion_channel_is_an_error() {
        let recorder = MilestoneReleaseRecorder::new(
            Arc::new(ScriptedEngine::dropping_channel()),
            Arc::new(AttributeRecordingDatastore::default()),
        );

        let error = recorder.run_release(request(&[])).await.unwrap_err();
        assert!(matches!(error, Error::Internal(_)));
    }
}
