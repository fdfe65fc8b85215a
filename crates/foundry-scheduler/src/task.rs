//! Task lifecycle types.

use foundry_core::ResourceId;
use foundry_core::build::BuildUnit;
use serde::Serialize;
use std::sync::Arc;

/// Lifecycle of one scheduled build attempt.
///
/// `Waiting → Ready → Running → {Succeeded | Failed}`; `Skipped` is reached
/// from `Waiting` when any transitive dependency fails. A task enters
/// `Running` exactly once and never leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Has unsatisfied dependencies.
    Waiting,
    /// All dependencies succeeded; eligible for dispatch.
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Never dispatched because a dependency failed.
    Skipped,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Skipped
        )
    }
}

/// One claimed attempt at building a unit within a run. Handed out by
/// [`TaskGraph::next`](crate::graph::TaskGraph::next) with the task already
/// marked running.
#[derive(Debug, Clone)]
pub struct Task {
    unit: Arc<BuildUnit>,
}

impl Task {
    pub(crate) fn new(unit: Arc<BuildUnit>) -> Self {
        Self { unit }
    }

    pub fn id(&self) -> ResourceId {
        self.unit.id
    }

    pub fn unit(&self) -> &BuildUnit {
        &self.unit
    }
}

/// Terminal outcome reported back into the graph for a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed,
}
