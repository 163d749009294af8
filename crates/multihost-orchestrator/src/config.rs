//! Orchestrator settings.
//!
//! Every section deserializes with `#[serde(default)]`, so a TOML file only
//! needs to name the values it changes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::container::{ContainerImage, ImagePullPolicy};

/// Settings for the whole provider pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Coordination store settings.
    pub etcd: EtcdConfig,

    /// Overlay agent settings.
    pub flannel: FlannelConfig,

    /// Network materialization settings.
    pub materializer: MaterializerConfig,
}

/// Settings for the etcd bootstrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    /// etcd image reference.
    pub image: String,

    /// When to pull the image.
    pub pull_policy: ImagePullPolicy,

    /// Node names are `{node_prefix}-{index}`.
    pub node_prefix: String,

    /// Client port.
    pub client_port: u16,

    /// Peer port.
    pub peer_port: u16,

    /// Cluster name, used as the initial cluster token.
    pub cluster_name: String,

    /// Timeout for a single store request in seconds.
    pub request_timeout_secs: u64,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            image: "quay.io/coreos/etcd:v2.3.8".to_string(),
            pull_policy: ImagePullPolicy::IfNotPresent,
            node_prefix: "etcd".to_string(),
            client_port: 2379,
            peer_port: 2380,
            cluster_name: "etcd-cluster".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl EtcdConfig {
    /// Returns the image with its pull policy.
    pub fn image(&self) -> ContainerImage {
        ContainerImage::new(&self.image).with_pull_policy(self.pull_policy)
    }

    /// Returns the request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings for the flannel distributor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlannelConfig {
    /// flannel image reference.
    pub image: String,

    /// When to pull the image.
    pub pull_policy: ImagePullPolicy,

    /// Backend type written into the network config record.
    pub backend: String,

    /// Where the agent writes its allocation inside the container.
    pub subnet_env_path: String,

    /// Bound on reading the allocation, in seconds.
    pub exec_timeout_secs: u64,

    /// Fail the deploy when the network config record cannot be written.
    pub strict_config_write: bool,
}

impl Default for FlannelConfig {
    fn default() -> Self {
        Self {
            image: "quay.io/coreos/flannel:v0.13.1-rc1".to_string(),
            pull_policy: ImagePullPolicy::IfNotPresent,
            backend: "vxlan".to_string(),
            subnet_env_path: "/run/flannel/subnet.env".to_string(),
            exec_timeout_secs: 10,
            strict_config_write: false,
        }
    }
}

impl FlannelConfig {
    /// Returns the image with its pull policy.
    pub fn image(&self) -> ContainerImage {
        ContainerImage::new(&self.image).with_pull_policy(self.pull_policy)
    }

    /// Returns the exec timeout as a Duration.
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

/// Settings for network materialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializerConfig {
    /// Check that host subnets sit inside the overlay and do not overlap.
    pub verify_disjoint: bool,

    /// Delay between allocation polls in milliseconds.
    pub poll_interval_ms: u64,

    /// How long to wait for every agent's allocation, in seconds.
    pub allocation_timeout_secs: u64,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            verify_disjoint: true,
            poll_interval_ms: 1000,
            allocation_timeout_secs: 60,
        }
    }
}

impl MaterializerConfig {
    /// Returns the poll interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the allocation timeout as a Duration.
    pub fn allocation_timeout(&self) -> Duration {
        Duration::from_secs(self.allocation_timeout_secs)
    }
}
