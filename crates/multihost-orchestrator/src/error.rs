//! Error types for the orchestrator crate.
//!
//! Errors fall into five groups: configuration errors, lifecycle guard
//! violations, runtime operation failures, the retryable
//! [`OrchestratorError::AllocationUnavailable`] condition, and store errors.

use multihost_core::CoreError;
use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur during orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invalid subnet, environment line, allocation record or settings.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `deploy()` called on a unit that is already deployed.
    #[error("{unit} is already deployed")]
    AlreadyDeployed {
        /// The unit name.
        unit: String,
    },

    /// An operation that needs a deployed unit was called before `deploy()`.
    #[error("{unit} is not deployed")]
    NotDeployed {
        /// The unit name.
        unit: String,
    },

    /// Failed to pull image.
    #[error("failed to pull image {image}: {reason}")]
    ImagePullFailed {
        /// The image that failed to pull.
        image: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Container creation failed.
    #[error("failed to create container {name}: {reason}")]
    ContainerCreationFailed {
        /// The container name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Container start failed.
    #[error("failed to start container {container_id}: {reason}")]
    ContainerStartFailed {
        /// The container ID.
        container_id: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Container removal failed.
    #[error("failed to remove container {container_id}: {reason}")]
    ContainerRemovalFailed {
        /// The container ID.
        container_id: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Container exec failed.
    #[error("exec failed in container {container_id}: {reason}")]
    ExecFailed {
        /// The container ID.
        container_id: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Network creation failed.
    #[error("failed to create network {name}: {reason}")]
    NetworkCreationFailed {
        /// The network name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Network removal failed.
    #[error("failed to remove network {network_id}: {reason}")]
    NetworkRemovalFailed {
        /// The network ID.
        network_id: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The overlay agent on `host` has not written its allocation yet.
    #[error("overlay allocation not yet available on {host}")]
    AllocationUnavailable {
        /// The host endpoint.
        host: String,
    },

    /// No per-host network exists for the host.
    #[error("network not found for host {0}")]
    NetworkNotFound(String),

    /// Timeout waiting for condition.
    #[error("timeout waiting for {condition}")]
    Timeout {
        /// The condition that timed out.
        condition: String,
    },

    /// Teardown failed.
    #[error("teardown failed: {0}")]
    TeardownFailed(String),

    /// The key/value store rejected a request.
    #[error("store error: {0}")]
    Store(String),

    /// The requested key does not exist in the store.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Docker API error.
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// HTTP transport error talking to the store.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl OrchestratorError {
    /// Creates an invalid configuration error.
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Creates an already deployed error.
    pub fn already_deployed(unit: impl Into<String>) -> Self {
        Self::AlreadyDeployed { unit: unit.into() }
    }

    /// Creates a not deployed error.
    pub fn not_deployed(unit: impl Into<String>) -> Self {
        Self::NotDeployed { unit: unit.into() }
    }

    /// Creates an image pull failed error.
    pub fn image_pull_failed(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImagePullFailed {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Creates a container creation failed error.
    pub fn container_creation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContainerCreationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a container start failed error.
    pub fn container_start_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContainerStartFailed {
            container_id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a container removal failed error.
    pub fn container_removal_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContainerRemovalFailed {
            container_id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an exec failed error.
    pub fn exec_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecFailed {
            container_id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a network creation failed error.
    pub fn network_creation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NetworkCreationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a network removal failed error.
    pub fn network_removal_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NetworkRemovalFailed {
            network_id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an allocation unavailable error.
    pub fn allocation_unavailable(host: impl Into<String>) -> Self {
        Self::AllocationUnavailable { host: host.into() }
    }

    /// Creates a network not found error.
    pub fn network_not_found(host: impl Into<String>) -> Self {
        Self::NetworkNotFound(host.into())
    }

    /// Creates a timeout error.
    pub fn timeout(condition: impl Into<String>) -> Self {
        Self::Timeout {
            condition: condition.into(),
        }
    }

    /// Creates a teardown failed error.
    pub fn teardown_failed(reason: impl Into<String>) -> Self {
        Self::TeardownFailed(reason.into())
    }

    /// Creates a store error.
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store(reason.into())
    }

    /// Creates a key not found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound(key.into())
    }

    /// Returns true if the error came from a container-runtime or network
    /// operation. These trigger rollback of the enclosing deploy.
    pub fn is_runtime_failure(&self) -> bool {
        matches!(
            self,
            Self::ImagePullFailed { .. }
                | Self::ContainerCreationFailed { .. }
                | Self::ContainerStartFailed { .. }
                | Self::ContainerRemovalFailed { .. }
                | Self::ExecFailed { .. }
                | Self::NetworkCreationFailed { .. }
                | Self::NetworkRemovalFailed { .. }
                | Self::DockerApi(_)
                | Self::Timeout { .. }
        )
    }

    /// Returns true if the caller may retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AllocationUnavailable { .. })
    }
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        Self::InvalidConfiguration(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
