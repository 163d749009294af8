//! Host client abstractions and the Docker implementation.
//!
//! This module provides the traits every host must implement and the
//! bollard-backed [`DockerHost`].

mod docker;
mod r#trait;

pub use docker::{ipam_config, network_options, DockerHost, DEFAULT_API_TIMEOUT_SECS, OPT_IP_MASQUERADE, OPT_MTU};
pub use r#trait::{
    ContainerRuntime, ContainerSpec, ExecOutput, HostClient, NetworkFabric, NetworkRequest,
};
