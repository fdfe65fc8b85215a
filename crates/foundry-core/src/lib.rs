//! Core domain types and contracts for the Foundry build coordinator.
//!
//! This crate contains:
//! - Resource identifiers and the shared error taxonomy
//! - Build units, collections and results
//! - The build driver contract and its registry
//! - The environment provisioning contract ([`environment::EnvironmentDriver`],
//!   [`environment::StartedEnvironment`])
//! - Repository manager and datastore contracts

pub mod build;
pub mod datastore;
pub mod driver;
pub mod environment;
pub mod error;
pub mod id;
pub mod repository;

pub use error::{Error, Result};
pub use id::ResourceId;
