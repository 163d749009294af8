//! Per-host networks on top of the overlay.
//!
//! - [`NetworkMaterializer`]: one bridge network per host from the agents' leases
//! - [`MultiHostNetworkProvider`]: etcd, flannel and materialization as one unit

mod materializer;
mod provider;

pub use materializer::{verify_disjoint, NetworkMaterializer};
pub use provider::MultiHostNetworkProvider;
