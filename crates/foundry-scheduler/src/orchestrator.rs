//! Build orchestrator: drives a task graph to completion without exceeding
//! a fixed concurrency bound, delegating each build to collaborators.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use foundry_core::build::{BuildCollection, BuildResult, BuildUnit};
use foundry_core::datastore::Datastore;
use foundry_core::driver::{BuildDriver, BuildDriverRegistry};
use foundry_core::environment::{
    EnvironmentDriverRegistry, EnvironmentSpec, StartedEnvironment,
};
use foundry_core::repository::{RepositoryHandle, RepositoryManager};
use foundry_core::{Error, ResourceId, Result};

use crate::graph::TaskGraph;
use crate::task::{Task, TaskOutcome, TaskState};

/// Default bound on concurrently running builds.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Terminal state of one unit after a run.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub state: TaskState,
}

/// Per-unit terminal states for a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub collection: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: HashMap<ResourceId, UnitReport>,
}

impl RunReport {
    /// True when every unit built successfully.
    pub fn is_success(&self) -> bool {
        self.outcomes
            .values()
            .all(|unit| unit.state == TaskState::Succeeded)
    }

    pub fn state_of(&self, id: ResourceId) -> Option<TaskState> {
        self.outcomes.get(&id).map(|unit| unit.state)
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.outcomes
            .values()
            .filter(|unit| unit.state == state)
            .count()
    }
}

/// Pulls ready tasks from the graph, dispatches each build through the
/// collaborators, and feeds completions back into the graph.
///
/// Collaborators are passed in explicitly; there is no ambient registry.
pub struct BuildOrchestrator {
    build_drivers: BuildDriverRegistry,
    environment_drivers: EnvironmentDriverRegistry,
    repository_manager: Arc<dyn RepositoryManager>,
    datastore: Arc<dyn Datastore>,
    access_token: Option<String>,
}

impl BuildOrchestrator {
    pub fn new(
        build_drivers: BuildDriverRegistry,
        environment_drivers: EnvironmentDriverRegistry,
        repository_manager: Arc<dyn RepositoryManager>,
        datastore: Arc<dyn Datastore>,
    ) -> Self {
        Self {
            build_drivers,
            environment_drivers,
            repository_manager,
            datastore,
            access_token: None,
        }
    }

    /// Token forwarded to environments so builds can call back into the
    /// coordinator.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Build every unit, honoring dependency order and the concurrency bound.
    ///
    /// Fails only for run-level misconfiguration (cyclic or unresolved
    /// dependencies), before any work starts. Per-unit failures surface in
    /// the returned [`RunReport`] and through skip cascades, never as an
    /// error from `run` itself.
    pub async fn run(
        &self,
        units: Vec<BuildUnit>,
        collection: BuildCollection,
        max_concurrent: usize,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let graph = Arc::new(TaskGraph::submit(units)?);
        let collection = Arc::new(collection);
        let slots = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let (completion_tx, mut completions) = mpsc::unbounded_channel();

        info!(collection = %collection.name, max_concurrent, "starting build run");

        while !graph.is_done() {
            // Capacity first: the loop blocks here, never on a build.
            let Ok(slot) = slots.clone().acquire_owned().await else {
                break;
            };
            match claim_next(&graph, &mut completions).await {
                Some(task) => self.dispatch(task, slot, &collection, &completion_tx),
                None => drop(slot),
            }
        }

        let outcomes = graph
            .snapshot()
            .into_iter()
            .map(|(unit, state)| {
                (
                    unit.id,
                    UnitReport {
                        name: unit.name.clone(),
                        state,
                    },
                )
            })
            .collect();
        let report = RunReport {
            collection: collection.name.clone(),
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            collection = %collection.name,
            success = report.is_success(),
            failed = report.count(TaskState::Failed),
            skipped = report.count(TaskState::Skipped),
            "build run finished"
        );
        Ok(report)
    }

    fn dispatch(
        &self,
        task: Task,
        slot: OwnedSemaphorePermit,
        collection: &Arc<BuildCollection>,
        completions: &mpsc::UnboundedSender<(Task, TaskOutcome)>,
    ) {
        let build_drivers = self.build_drivers.clone();
        let environment_drivers = self.environment_drivers.clone();
        let repository_manager = self.repository_manager.clone();
        let datastore = self.datastore.clone();
        let access_token = self.access_token.clone();
        let collection = collection.clone();
        let completions = completions.clone();

        tokio::spawn(async move {
            info!(unit = %task.unit().name, "dispatching build");
            let outcome = match run_build(
                task.unit(),
                &collection,
                &build_drivers,
                &environment_drivers,
                repository_manager.as_ref(),
                datastore.as_ref(),
                access_token,
            )
            .await
            {
                Ok(result) if result.status.is_success() => TaskOutcome::Success,
                Ok(result) => {
                    warn!(
                        unit = %task.unit().name,
                        status = ?result.status,
                        "build reported failure"
                    );
                    TaskOutcome::Failed
                }
                Err(error) => {
                    warn!(unit = %task.unit().name, %error, "build dispatch failed");
                    TaskOutcome::Failed
                }
            };
            // Capacity frees up before the terminal transition becomes
            // visible to the dispatch loop.
            drop(slot);
            let _ = completions.send((task, outcome));
        });
    }
}

/// Claim a ready task, applying completions while none is available.
/// `None` means the run is finished.
async fn claim_next(
    graph: &TaskGraph,
    completions: &mut mpsc::UnboundedReceiver<(Task, TaskOutcome)>,
) -> Option<Task> {
    loop {
        if let Some(task) = graph.next() {
            return Some(task);
        }
        if graph.is_done() {
            return None;
        }
        // Some task is still running; its completion may unblock more work.
        match completions.recv().await {
            Some((task, outcome)) => graph.complete(&task, outcome),
            None => return None,
        }
    }
}

/// The full dispatch chain for one task. Any error is the task's failure,
/// never the run's; the environment is destroyed regardless of outcome.
async fn run_build(
    unit: &BuildUnit,
    collection: &BuildCollection,
    build_drivers: &BuildDriverRegistry,
    environment_drivers: &EnvironmentDriverRegistry,
    repository_manager: &dyn RepositoryManager,
    datastore: &dyn Datastore,
    access_token: Option<String>,
) -> Result<BuildResult> {
    let build_driver = build_drivers.resolve(unit.environment.build_type)?;
    let environment_driver = environment_drivers.resolve(unit.environment.image_type)?;

    let workspace = repository_manager.create_repository(unit, collection).await?;
    let environment = environment_driver.start_environment(EnvironmentSpec {
        image_id: unit.environment.image_id.clone(),
        image_repository_url: unit.environment.image_repository_url.clone(),
        image_type: unit.environment.image_type,
        workspace: workspace.clone(),
        debug: unit.debug.clone(),
        access_token,
    })?;

    let built = execute_build(unit, &environment, &workspace, build_driver.as_ref()).await;

    if let Err(error) = environment_driver.destroy(&environment).await {
        warn!(unit = %unit.name, %error, "environment teardown failed");
    }
    let result = built?;

    // Fire-and-forget persistence; storage failures don't fail the build.
    if let Err(error) = datastore.store_completed_build(&result).await {
        warn!(unit = %unit.name, %error, "failed to store completed build");
    }
    repository_manager.persist_artifacts(&workspace, &result).await?;
    Ok(result)
}

async fn execute_build(
    unit: &BuildUnit,
    environment: &StartedEnvironment,
    workspace: &RepositoryHandle,
    driver: &dyn BuildDriver,
) -> Result<BuildResult> {
    environment.await_ready().await?;
    let completion = driver.start_build(unit, environment, workspace).await?;
    completion.await.map_err(|_| {
        Error::BuildExecution("build driver dropped the completion channel".to_string())
    })
}
