//! Host handles.
//!
//! A [`Host`] is one machine taking part in the overlay: a container-runtime
//! endpoint plus an address the other hosts can reach it on. Two hosts are
//! the same host iff their endpoints are equal.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv6Addr;
use std::sync::Arc;
use url::Url;

use crate::backend::{DockerHost, HostClient, DEFAULT_API_TIMEOUT_SECS};
use crate::error::{OrchestratorError, Result};

/// A machine reachable through a container-runtime endpoint.
#[derive(Clone)]
pub struct Host {
    endpoint: String,
    address: String,
    client: Arc<dyn HostClient>,
}

impl Host {
    /// Creates a host from an already connected client.
    pub fn new(
        endpoint: impl Into<String>,
        address: impl Into<String>,
        client: Arc<dyn HostClient>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            address: address.into(),
            client,
        }
    }

    /// Connects to a Docker daemon at `endpoint`, e.g. `tcp://10.0.0.1:2375`.
    ///
    /// The host address is the endpoint's host part, so `unix://` endpoints
    /// need [`Host::docker_with_address`].
    pub fn docker(endpoint: &str) -> Result<Self> {
        let address = address_from_endpoint(endpoint)?;
        Self::docker_with_address(endpoint, address)
    }

    /// Connects to a Docker daemon at `endpoint` and advertises `address`
    /// to the other hosts.
    pub fn docker_with_address(endpoint: &str, address: impl Into<String>) -> Result<Self> {
        let client = DockerHost::connect(endpoint, DEFAULT_API_TIMEOUT_SECS)?;
        Ok(Self::new(endpoint, address, Arc::new(client)))
    }

    /// Returns the runtime endpoint. This is the host's identity.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the address other hosts use to reach this one.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the runtime and network client for this host.
    pub fn client(&self) -> &dyn HostClient {
        self.client.as_ref()
    }

    /// Returns `http://{address}:{port}`.
    pub fn http_url(&self, port: u16) -> String {
        if self.address.parse::<Ipv6Addr>().is_ok() {
            format!("http://[{}]:{}", self.address, port)
        } else {
            format!("http://{}:{}", self.address, port)
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.endpoint.hash(state);
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("endpoint", &self.endpoint)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.endpoint)
    }
}

/// Extracts the host part of a runtime endpoint.
pub fn address_from_endpoint(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint).map_err(|e| {
        OrchestratorError::invalid_configuration(format!("invalid endpoint '{}': {}", endpoint, e))
    })?;

    url.host_str()
        .filter(|host| !host.is_empty())
        .map(|host| host.trim_start_matches('[').trim_end_matches(']').to_string())
        .ok_or_else(|| {
            OrchestratorError::invalid_configuration(format!(
                "endpoint '{}' has no host part; supply an address explicitly",
                endpoint
            ))
        })
}
