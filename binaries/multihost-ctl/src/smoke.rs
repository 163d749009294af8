//! Cross-host connectivity check.
//!
//! Starts one peer container per host on that host's overlay network, then
//! pings every peer address from every peer.

use anyhow::{Context, Result};
use bollard::container::{Config, CreateContainerOptions, InspectContainerOptions};
use bollard::models::HostConfig;
use futures::future::join_all;
use multihost_orchestrator::container::ensure_image;
use multihost_orchestrator::{
    ContainerImage, ContainerRuntime, DockerHost, Host, HostNetwork, MultiHostNetworkProvider,
};
use multihost_orchestrator::backend::DEFAULT_API_TIMEOUT_SECS;
use tracing::{info, warn};

use crate::config::SmokeConfig;

/// Marker `ping` prints when every echo request was answered.
const NO_LOSS: &str = ", 0% packet loss";

/// Returns true if `ping` output reports no packet loss.
pub fn ping_succeeded(output: &str) -> bool {
    output.contains(NO_LOSS)
}

struct Peer {
    host: Host,
    docker: DockerHost,
    container_id: String,
    address: String,
}

/// Outcome of one ping run.
#[derive(Debug, Clone)]
pub struct PingResult {
    /// Endpoint of the host the ping ran on.
    pub from: String,
    /// Address pinged.
    pub to: String,
    /// Whether every echo request was answered.
    pub passed: bool,
}

/// Outcome of a connectivity check.
#[derive(Debug, Clone, Default)]
pub struct SmokeReport {
    /// Every ping run, in peer order.
    pub results: Vec<PingResult>,
}

impl SmokeReport {
    /// Returns true if at least one ping ran and none lost packets.
    pub fn passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.passed)
    }

    /// Returns the failed runs.
    pub fn failures(&self) -> impl Iterator<Item = &PingResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Runs the check against a deployed provider.
///
/// Peer containers are removed before returning, also on error.
pub async fn run(provider: &MultiHostNetworkProvider, config: &SmokeConfig) -> Result<SmokeReport> {
    let networks = provider.networks().await;
    let mut peers = Vec::with_capacity(networks.len());

    for (index, (host, network)) in networks.into_iter().enumerate() {
        match start_peer(index, host, &network, config).await {
            Ok(peer) => peers.push(peer),
            Err(e) => {
                remove_peers(&peers).await;
                return Err(e);
            }
        }
    }

    let report = ping_all(&peers, config).await;
    remove_peers(&peers).await;
    Ok(report)
}

async fn start_peer(
    index: usize,
    host: Host,
    network: &HostNetwork,
    config: &SmokeConfig,
) -> Result<Peer> {
    let docker = DockerHost::connect(host.endpoint(), DEFAULT_API_TIMEOUT_SECS)
        .with_context(|| format!("Failed to connect to {}", host))?;
    ensure_image(&host, &ContainerImage::new(&config.image))
        .await
        .with_context(|| format!("Failed to pull {} on {}", config.image, host))?;

    let name = format!("{}-peer", network.name);
    let options = CreateContainerOptions {
        name: name.clone(),
        platform: None,
    };
    let container = Config {
        image: Some(config.image.clone()),
        host_config: Some(HostConfig {
            network_mode: Some(network.name.clone()),
            ..Default::default()
        }),
        ..Default::default()
    };

    let created = docker
        .docker()
        .create_container(Some(options), container)
        .await
        .with_context(|| format!("Failed to create peer {} on {}", name, host))?;

    let mut peer = Peer {
        host,
        docker,
        container_id: created.id,
        address: String::new(),
    };

    if let Err(e) = start_and_inspect(&mut peer, &network.name).await {
        remove_peers(std::slice::from_ref(&peer)).await;
        return Err(e);
    }

    info!(
        index,
        host = %peer.host,
        network = %network.name,
        address = %peer.address,
        "Started peer"
    );
    Ok(peer)
}

async fn start_and_inspect(peer: &mut Peer, network: &str) -> Result<()> {
    peer.docker.start_container(&peer.container_id).await?;

    let inspect = peer
        .docker
        .docker()
        .inspect_container(&peer.container_id, None::<InspectContainerOptions>)
        .await?;

    peer.address = inspect
        .network_settings
        .and_then(|s| s.networks)
        .and_then(|mut n| n.remove(network))
        .and_then(|e| e.ip_address)
        .filter(|ip| !ip.is_empty())
        .with_context(|| format!("Peer on {} has no address on {}", peer.host, network))?;

    Ok(())
}

async fn ping_all(peers: &[Peer], config: &SmokeConfig) -> SmokeReport {
    let count = config.ping_count.to_string();
    let runs = peers.iter().flat_map(|peer| {
        let count = count.as_str();
        peers.iter().map(move |target| async move {
            let cmd = ["ping", "-c", count, target.address.as_str()];
            let passed = match peer
                .docker
                .exec(&peer.container_id, &cmd, config.ping_timeout())
                .await
            {
                Ok(output) => ping_succeeded(&output.stdout_lossy()),
                Err(e) => {
                    warn!(host = %peer.host, target = %target.address, error = %e, "Ping failed to run");
                    false
                }
            };

            PingResult {
                from: peer.host.endpoint().to_string(),
                to: target.address.clone(),
                passed,
            }
        })
    });

    SmokeReport {
        results: join_all(runs).await,
    }
}

async fn remove_peers(peers: &[Peer]) {
    for peer in peers {
        if let Err(e) = peer.docker.destroy_container(&peer.container_id).await {
            warn!(host = %peer.host, error = %e, "Failed to remove peer");
        }
    }
}
