//! Build scheduling for the Foundry build coordinator.
//!
//! Turns a set of build units into a dependency graph and drives it to
//! completion with a bounded number of concurrent builds.

pub mod graph;
pub mod orchestrator;
pub mod release;
pub mod task;

pub use graph::TaskGraph;
pub use orchestrator::{BuildOrchestrator, DEFAULT_MAX_CONCURRENT, RunReport, UnitReport};
pub use release::{MilestoneReleaseRecorder, MilestoneReleaseRequest, ProcessEngine};
pub use task::{Task, TaskOutcome, TaskState};
