//! Error types for Foundry.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cyclic dependency among build units: {0}")]
    CyclicDependency(String),

    #[error("unit {unit} depends on {dependency}, which is not in the submitted set")]
    UnresolvedDependency { unit: String, dependency: String },

    #[error("no compatible driver registered for {0}")]
    NoCompatibleDriver(String),

    #[error("unsupported environment type: {0}")]
    UnsupportedEnvironment(String),

    #[error("environment not ready after {0:?}")]
    ProvisioningTimeout(Duration),

    #[error("environment provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("build execution failed: {0}")]
    BuildExecution(String),

    #[error("repository operation failed: {0}")]
    Repository(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
