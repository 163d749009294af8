//! Topology types: the hosts taking part in the overlay and the networks
//! materialized on them.

mod host;
mod network;

pub use host::{address_from_endpoint, Host};
pub use network::HostNetwork;
