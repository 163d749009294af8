//! Per-host network materialization.
//!
//! Once the flannel agents have leased their subnets, [`NetworkMaterializer`]
//! reads each lease back and creates a bridge network on the same host with
//! the leased subnet as its IPAM range. Containers attached to that network
//! get addresses routable across the overlay.

use multihost_core::Subnet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::backend::{NetworkFabric, NetworkRequest};
use crate::cluster::{DeploymentUnit, FlannelCluster};
use crate::config::MaterializerConfig;
use crate::error::{OrchestratorError, Result};
use crate::topology::{Host, HostNetwork};

#[derive(Debug, Clone)]
struct Materialized {
    host: Host,
    network: HostNetwork,
}

/// Creates one network per host from the agents' leases.
#[derive(Debug)]
pub struct NetworkMaterializer {
    name: String,
    flannel: Arc<FlannelCluster>,
    config: MaterializerConfig,
    networks: RwLock<Vec<Materialized>>,
}

impl NetworkMaterializer {
    /// Creates a materializer naming networks `{name}-{index}`.
    pub fn new(name: impl Into<String>, flannel: Arc<FlannelCluster>, config: MaterializerConfig) -> Self {
        Self {
            name: name.into(),
            flannel,
            config,
            networks: RwLock::new(Vec::new()),
        }
    }

    /// Returns the network name for the agent at `index`. Indices start at 1.
    pub fn network_name(&self, index: usize) -> String {
        format!("{}-{}", self.name, index + 1)
    }

    /// Materializes a network for every deployed agent that lacks one.
    ///
    /// Hosts are processed in order. Hosts already materialized are skipped,
    /// so the call can be repeated until every lease is available.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::NotDeployed`] if no agents are deployed
    /// - [`OrchestratorError::AllocationUnavailable`] if a lease is not
    ///   written yet; networks created so far are kept
    /// - runtime failures, after removing the networks this call created
    /// - [`OrchestratorError::InvalidConfiguration`] for a malformed lease
    ///   or, when enabled, a failed disjointness check
    pub async fn create_networks(&self) -> Result<()> {
        let agents = self.flannel.agents().await;
        if agents.is_empty() {
            return Err(OrchestratorError::not_deployed(self.flannel.name()));
        }

        let mut networks = self.networks.write().await;
        let mut created: Vec<Materialized> = Vec::new();

        for agent in &agents {
            if networks.iter().any(|m| m.host == agent.host) {
                continue;
            }

            let step = async {
                let allocation = self.flannel.read_allocation(agent).await?;
                let request = NetworkRequest {
                    name: self.network_name(agent.index),
                    subnet: allocation.subnet,
                    mtu: allocation.mtu,
                    ip_masquerade: allocation.ip_masq,
                };

                let id = agent.host.client().create_network(&request).await?;
                Ok::<_, OrchestratorError>(HostNetwork::new(request.name, id, request.subnet))
            }
            .await;

            match step {
                Ok(network) => {
                    info!(
                        host = %agent.host,
                        network = %network.name,
                        subnet = %network.subnet,
                        "Materialized host network"
                    );
                    let entry = Materialized {
                        host: agent.host.clone(),
                        network,
                    };
                    networks.push(entry.clone());
                    created.push(entry);
                }
                Err(e) if e.is_runtime_failure() => {
                    error!(host = %agent.host, error = %e, "Network materialization failed");
                    networks.retain(|m| !created.iter().any(|c| c.network.id == m.network.id));
                    destroy_all(&created).await;
                    return Err(e);
                }
                Err(e) => {
                    debug!(host = %agent.host, error = %e, "Host not materialized");
                    return Err(e);
                }
            }
        }

        if self.config.verify_disjoint {
            let subnets: Vec<Subnet> = networks.iter().map(|m| m.network.subnet).collect();
            verify_disjoint(&self.flannel.subnet(), &subnets)?;
        }

        Ok(())
    }

    /// Returns the network materialized on `host`.
    pub async fn get_network(&self, host: &Host) -> Result<HostNetwork> {
        self.networks
            .read()
            .await
            .iter()
            .find(|m| &m.host == host)
            .map(|m| m.network.clone())
            .ok_or_else(|| OrchestratorError::network_not_found(host.endpoint()))
    }

    /// Returns every materialized network with its host, in host order.
    pub async fn networks(&self) -> Vec<(Host, HostNetwork)> {
        self.networks
            .read()
            .await
            .iter()
            .map(|m| (m.host.clone(), m.network.clone()))
            .collect()
    }

    /// Returns true if every deployed agent has a network.
    pub async fn is_complete(&self) -> bool {
        let agents = self.flannel.agents().await;
        let networks = self.networks.read().await;
        !agents.is_empty() && agents.iter().all(|a| networks.iter().any(|m| m.host == a.host))
    }

    /// Removes every materialized network.
    pub async fn close(&self) -> Result<()> {
        let networks = std::mem::take(&mut *self.networks.write().await);
        if networks.is_empty() {
            return Ok(());
        }

        info!(name = %self.name, networks = networks.len(), "Deleting host networks");
        let errors = destroy_all(&networks).await;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::teardown_failed(errors.join("; ")))
        }
    }
}

async fn destroy_all(networks: &[Materialized]) -> Vec<String> {
    let mut errors = Vec::new();
    for m in networks {
        if let Err(e) = m.host.client().destroy_network(&m.network.id).await {
            warn!(host = %m.host, network = %m.network.name, error = %e, "Failed to remove network");
            errors.push(e.to_string());
        }
    }
    errors
}

/// Checks that every subnet lies inside `overlay` and that no two overlap.
pub fn verify_disjoint(overlay: &Subnet, subnets: &[Subnet]) -> Result<()> {
    for subnet in subnets {
        if !overlay.contains(subnet) {
            return Err(OrchestratorError::invalid_configuration(format!(
                "host subnet {} is outside overlay {}",
                subnet, overlay
            )));
        }
    }

    for (i, a) in subnets.iter().enumerate() {
        for b in &subnets[i + 1..] {
            if a.overlaps(b) {
                return Err(OrchestratorError::invalid_configuration(format!(
                    "host subnets {} and {} overlap",
                    a, b
                )));
            }
        }
    }

    Ok(())
}
