//! Multi-host overlay networking on plain container hosts.
//!
//! This crate stitches a set of independent container hosts into one
//! overlay network. It bootstraps an etcd cluster across the hosts, publishes
//! the overlay configuration into it, runs a flannel agent on every host and
//! finally creates a local bridge network per host whose address range is
//! the subnet that host's agent leased.
//!
//! # Overview
//!
//! The pipeline has three stages, each a [`DeploymentUnit`]:
//!
//! - **etcd bootstrap**: one member per host, all started before any client
//!   connects
//! - **flannel distribution**: the network config record is written under
//!   `{prefix}/config`, then one privileged, host-networked agent per host
//! - **network materialization**: each agent's lease is read back and turned
//!   into a host-local network
//!
//! Teardown runs in the reverse order and collects every failure instead of
//! stopping at the first one.
//!
//! # Architecture
//!
//! - [`backend`]: the host traits and the Docker implementation
//! - [`store`]: the key/value store seam and the etcd v2 client
//! - [`cluster`]: the etcd and flannel deployment units
//! - [`network`]: the materializer and the top-level provider
//! - [`topology`]: hosts and the networks created on them
//! - [`container`]: images, pull policies and container tracking
//! - [`config`]: settings for every stage
//! - [`testing`]: in-memory hosts and stores
//! - [`error`]: error types
//!
//! # Example
//!
//! ```ignore
//! use multihost_orchestrator::{DeploymentUnit, Host, MultiHostNetworkProvider, ProviderConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let hosts = vec![
//!         Host::docker("tcp://10.0.0.1:2375")?,
//!         Host::docker("tcp://10.0.0.2:2375")?,
//!     ];
//!
//!     let provider = MultiHostNetworkProvider::new(
//!         hosts.clone(),
//!         "overlay",
//!         "10.58.0.0/16".parse()?,
//!         8472,
//!         ProviderConfig::default(),
//!     )?;
//!     provider.deploy().await?;
//!
//!     for (host, network) in provider.networks().await {
//!         println!("{} -> {}", host, network);
//!     }
//!
//!     provider.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backend;
pub mod cluster;
pub mod config;
pub mod container;
pub mod error;
pub mod network;
pub mod store;
pub mod testing;
pub mod topology;

// Re-export commonly used types at the crate root
pub use backend::{ContainerRuntime, DockerHost, ExecOutput, HostClient, NetworkFabric};
pub use cluster::{DeploymentUnit, EtcdCluster, FlannelCluster, OverlayAllocation};
pub use config::{EtcdConfig, FlannelConfig, MaterializerConfig, ProviderConfig};
pub use container::{ContainerImage, ImagePullPolicy};
pub use error::{OrchestratorError, Result};
pub use network::{MultiHostNetworkProvider, NetworkMaterializer};
pub use store::{EtcdClient, EtcdConnector, KeyValueStore, StoreConnector};
pub use topology::{Host, HostNetwork};
