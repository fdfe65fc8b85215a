//! Pool-backed environment provisioning for the Foundry build coordinator.
//!
//! Implements [`foundry_core::environment::EnvironmentDriver`] on top of a
//! pluggable [`EnvironmentBackend`]: bring-up runs on a bounded worker pool
//! and readiness is confirmed by a [`PullingMonitor`] polling the backend.

pub mod backend;
pub mod config;
pub mod driver;
pub mod monitor;

pub use backend::{EnvironmentBackend, Health};
pub use config::EnvironmentDriverConfig;
pub use driver::PooledEnvironmentDriver;
pub use monitor::{MonitorResult, PullingMonitor};
