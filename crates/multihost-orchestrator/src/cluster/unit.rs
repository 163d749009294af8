//! The deployment unit contract.

use async_trait::async_trait;

use crate::error::Result;

/// A set of containers deployed and torn down together.
///
/// # Lifecycle
///
/// 1. `deploy()` brings every container up, or leaves nothing behind
/// 2. `close()` removes everything the unit created
///
/// `close()` is safe at any point: before `deploy()`, after a failed
/// `deploy()`, and any number of times in a row.
#[async_trait]
pub trait DeploymentUnit: Send + Sync {
    /// Returns the unit name used in logs and errors.
    fn name(&self) -> &str;

    /// Deploys the unit.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::AlreadyDeployed`](crate::error::OrchestratorError::AlreadyDeployed)
    /// if the unit is running. Any other failure has already been rolled
    /// back when it is returned.
    async fn deploy(&self) -> Result<()>;

    /// Tears the unit down.
    async fn close(&self) -> Result<()>;

    /// Returns true once `deploy()` succeeded and until `close()` runs.
    async fn is_deployed(&self) -> bool;

    /// Returns the number of hosts the unit spans.
    fn node_count(&self) -> usize;
}
