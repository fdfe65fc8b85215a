//! Task graph: dependency edges plus per-task state for one scheduling run.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use foundry_core::build::BuildUnit;
use foundry_core::{Error, ResourceId, Result};

use crate::task::{Task, TaskOutcome, TaskState};

#[derive(Debug)]
struct Node {
    unit: Arc<BuildUnit>,
    state: TaskState,
    dependencies: Vec<ResourceId>,
    /// Reverse edges, computed at construction for failure propagation.
    dependents: Vec<ResourceId>,
}

#[derive(Debug)]
struct GraphInner {
    nodes: HashMap<ResourceId, Node>,
    /// Tasks eligible for dispatch, in the order their dependencies were
    /// last satisfied.
    ready: VecDeque<ResourceId>,
}

/// The set of all tasks for one run plus their edges.
///
/// Shared between the dispatch loop and completion contexts; `next` and
/// `complete` serialize on the internal lock. The concurrency bound on
/// running tasks is owned by the orchestrator, not the graph.
#[derive(Debug)]
pub struct TaskGraph {
    inner: Mutex<GraphInner>,
}

impl TaskGraph {
    /// Build task nodes and both forward and reverse dependency edges.
    ///
    /// Fails with [`Error::UnresolvedDependency`] if a declared dependency is
    /// not part of the submitted set, and [`Error::CyclicDependency`] if the
    /// dependency relation is not acyclic.
    pub fn submit(units: Vec<BuildUnit>) -> Result<Self> {
        let order: Vec<ResourceId> = units.iter().map(|unit| unit.id).collect();
        let mut nodes: HashMap<ResourceId, Node> = units
            .into_iter()
            .map(|unit| {
                let node = Node {
                    dependencies: unit.dependencies.clone(),
                    dependents: Vec::new(),
                    state: TaskState::Waiting,
                    unit: Arc::new(unit),
                };
                (node.unit.id, node)
            })
            .collect();

        for id in &order {
            let dependencies = nodes[id].dependencies.clone();
            let name = nodes[id].unit.name.clone();
            for dependency in dependencies {
                match nodes.get_mut(&dependency) {
                    Some(node) => node.dependents.push(*id),
                    None => {
                        return Err(Error::UnresolvedDependency {
                            unit: name,
                            dependency: dependency.to_string(),
                        });
                    }
                }
            }
        }

        Self::check_acyclic(&order, &nodes)?;

        let mut ready = VecDeque::new();
        for id in &order {
            if nodes[id].dependencies.is_empty() {
                if let Some(node) = nodes.get_mut(id) {
                    node.state = TaskState::Ready;
                }
                ready.push_back(*id);
            }
        }

        Ok(Self {
            inner: Mutex::new(GraphInner { nodes, ready }),
        })
    }

    /// Kahn's algorithm: if a topological order does not cover every node,
    /// the leftovers form the cycle.
    fn check_acyclic(order: &[ResourceId], nodes: &HashMap<ResourceId, Node>) -> Result<()> {
        let mut indegree: HashMap<ResourceId, usize> = order
            .iter()
            .map(|id| (*id, nodes[id].dependencies.len()))
            .collect();
        let mut queue: VecDeque<ResourceId> = order
            .iter()
            .filter(|id| indegree[*id] == 0)
            .copied()
            .collect();

        let mut visited = 0;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for dependent in &nodes[&id].dependents {
                if let Some(remaining) = indegree.get_mut(dependent) {
                    *remaining -= 1;
                    if *remaining == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        if visited < order.len() {
            let cyclic: Vec<String> = order
                .iter()
                .filter(|id| indegree[*id] > 0)
                .map(|id| nodes[id].unit.name.clone())
                .collect();
            return Err(Error::CyclicDependency(cyclic.join(", ")));
        }
        Ok(())
    }

    /// Claim one ready task, atomically marking it running so concurrent
    /// callers never receive the same task.
    ///
    /// `None` means no task is ready right now; distinguish "run finished"
    /// from "tasks still running may unblock more work" via [`Self::is_done`].
    pub fn next(&self) -> Option<Task> {
        let mut inner = self.lock();
        let id = inner.ready.pop_front()?;
        let node = inner.nodes.get_mut(&id)?;
        node.state = TaskState::Running;
        debug!(unit = %node.unit.name, "task claimed for dispatch");
        Some(Task::new(node.unit.clone()))
    }

    /// Record a dispatched task's terminal outcome.
    ///
    /// On success, dependents whose dependency sets are now fully satisfied
    /// become ready (FIFO). On failure, every transitive dependent is
    /// skipped. Completions for tasks not in the running state are ignored.
    pub fn complete(&self, task: &Task, outcome: TaskOutcome) {
        let mut inner = self.lock();
        let id = task.id();
        {
            let Some(node) = inner.nodes.get_mut(&id) else {
                warn!(task = %id, "completion for unknown task; ignoring");
                return;
            };
            if node.state != TaskState::Running {
                warn!(
                    unit = %node.unit.name,
                    state = ?node.state,
                    "completion for task that is not running; ignoring"
                );
                return;
            }
            node.state = match outcome {
                TaskOutcome::Success => TaskState::Succeeded,
                TaskOutcome::Failed => TaskState::Failed,
            };
            info!(unit = %node.unit.name, ?outcome, "task completed");
        }

        match outcome {
            TaskOutcome::Success => inner.promote_dependents(id),
            TaskOutcome::Failed => inner.skip_dependents(id),
        }
    }

    /// True once every task is in a terminal state.
    pub fn is_done(&self) -> bool {
        self.lock().nodes.values().all(|node| node.state.is_terminal())
    }

    pub fn state_of(&self, id: ResourceId) -> Option<TaskState> {
        self.lock().nodes.get(&id).map(|node| node.state)
    }

    /// Current state of every task, for reporting.
    pub fn snapshot(&self) -> Vec<(Arc<BuildUnit>, TaskState)> {
        self.lock()
            .nodes
            .values()
            .map(|node| (node.unit.clone(), node.state))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, GraphInner> {
        self.inner.lock().expect("task graph lock poisoned")
    }
}

impl GraphInner {
    fn promote_dependents(&mut self, completed: ResourceId) {
        let dependents = self.nodes[&completed].dependents.clone();
        for dependent in dependents {
            let satisfied = self.nodes[&dependent]
                .dependencies
                .iter()
                .all(|dependency| self.nodes[dependency].state == TaskState::Succeeded);
            if let Some(node) = self.nodes.get_mut(&dependent) {
                if node.state == TaskState::Waiting && satisfied {
                    node.state = TaskState::Ready;
                    debug!(unit = %node.unit.name, "dependencies satisfied; task ready");
                    self.ready.push_back(dependent);
                }
            }
        }
    }

    fn skip_dependents(&mut self, failed: ResourceId) {
        let mut stack = self.nodes[&failed].dependents.clone();
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            match node.state {
                TaskState::Waiting | TaskState::Ready => {
                    node.state = TaskState::Skipped;
                    info!(unit = %node.unit.name, "skipping task after dependency failure");
                    self.ready.retain(|ready| *ready != id);
                    stack.extend(self.nodes[&id].dependents.iter().copied());
                }
                _ => {}
            }
        }
    }
}
