//! Deployment units.
//!
//! - [`EtcdCluster`]: one etcd member per host, bootstrapped as one cluster
//! - [`FlannelCluster`]: the overlay config record plus one agent per host
//! - [`OverlayAllocation`]: what each agent leased for its host

mod allocation;
mod etcd;
mod flannel;
mod unit;

pub use allocation::{OverlayAllocation, KEY_IPMASQ, KEY_MTU, KEY_NETWORK, KEY_SUBNET};
pub use etcd::EtcdCluster;
pub use flannel::{BackendRecord, FlannelCluster, NetworkConfigRecord};
pub use unit::DeploymentUnit;
