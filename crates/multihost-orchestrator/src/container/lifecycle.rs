//! Container lifecycle tracking.
//!
//! Each deployment unit owns a [`LifecycleManager`] holding one
//! [`DeployedAgentRecord`] per container it created. Records are appended in
//! host order during deploy, walked in the same order during teardown, and
//! cleared by teardown whether or not every removal succeeded.

use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::backend::ContainerRuntime;
use crate::container::spec::{ContainerImage, ImagePullPolicy};
use crate::error::{OrchestratorError, Result};
use crate::topology::Host;

/// A container created by a deployment unit on one host.
#[derive(Debug, Clone)]
pub struct DeployedAgentRecord {
    /// Position of the host in the unit's host list.
    pub index: usize,

    /// The host the container runs on.
    pub host: Host,

    /// Logical container name.
    pub name: String,

    /// Container ID assigned by the runtime.
    pub container_id: String,
}

impl DeployedAgentRecord {
    /// Creates a new record.
    pub fn new(
        index: usize,
        host: Host,
        name: impl Into<String>,
        container_id: impl Into<String>,
    ) -> Self {
        Self {
            index,
            host,
            name: name.into(),
            container_id: container_id.into(),
        }
    }

    /// Returns the short container ID (first 12 characters).
    pub fn short_id(&self) -> &str {
        self.container_id.get(..12).unwrap_or(&self.container_id)
    }
}

/// Tracks the containers one unit has created.
#[derive(Debug, Default)]
pub struct LifecycleManager {
    records: RwLock<Vec<DeployedAgentRecord>>,
}

impl LifecycleManager {
    /// Creates an empty lifecycle manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a created container.
    pub async fn register(&self, record: DeployedAgentRecord) {
        debug!(
            host = %record.host,
            container = %record.name,
            id = %record.short_id(),
            "Registered container"
        );
        self.records.write().await.push(record);
    }

    /// Returns all records in registration order.
    pub async fn all(&self) -> Vec<DeployedAgentRecord> {
        self.records.read().await.clone()
    }

    /// Returns the number of tracked containers.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if nothing is tracked.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Destroys every tracked container and clears the records.
    ///
    /// Every removal is attempted even after a failure. The failures are
    /// reported together as [`OrchestratorError::TeardownFailed`]. Calling
    /// this with nothing tracked is a no-op.
    pub async fn teardown(&self) -> Result<()> {
        let records = std::mem::take(&mut *self.records.write().await);
        if records.is_empty() {
            return Ok(());
        }

        let mut errors = Vec::new();
        for record in &records {
            if let Err(e) = record
                .host
                .client()
                .destroy_container(&record.container_id)
                .await
            {
                error!(
                    host = %record.host,
                    container = %record.name,
                    error = %e,
                    "Failed to remove container"
                );
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            info!(containers = records.len(), "Removed containers");
            Ok(())
        } else {
            Err(OrchestratorError::teardown_failed(errors.join("; ")))
        }
    }
}

/// Makes `image` available on `host` according to its pull policy.
pub async fn ensure_image(host: &Host, image: &ContainerImage) -> Result<()> {
    let reference = image.reference();
    let client = host.client();

    match image.pull_policy {
        ImagePullPolicy::Always => client.pull_image(reference).await,
        ImagePullPolicy::IfNotPresent => {
            if client.image_exists(reference).await? {
                debug!(host = %host, image = %reference, "Image already present");
                Ok(())
            } else {
                client.pull_image(reference).await
            }
        }
        ImagePullPolicy::Never => {
            if client.image_exists(reference).await? {
                Ok(())
            } else {
                Err(OrchestratorError::image_pull_failed(
                    reference,
                    "image not present and pull policy is Never",
                ))
            }
        }
    }
}
