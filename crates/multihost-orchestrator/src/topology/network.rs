//! Per-host network records.

use multihost_core::Subnet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A host-local bridge network mirroring one overlay allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostNetwork {
    /// Network name, `{provider}-{index}`.
    pub name: String,

    /// Runtime-assigned network ID.
    pub id: String,

    /// The host's slice of the overlay, used as the network's IPAM subnet.
    pub subnet: Subnet,
}

impl HostNetwork {
    /// Creates a new host network record.
    pub fn new(name: impl Into<String>, id: impl Into<String>, subnet: Subnet) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            subnet,
        }
    }

    /// Returns the short network ID (first 12 characters).
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

impl fmt::Display for HostNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.short_id(), self.subnet)
    }
}
