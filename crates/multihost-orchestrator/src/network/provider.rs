//! The multi-host network provider.
//!
//! [`MultiHostNetworkProvider`] sequences the whole pipeline: etcd, then
//! flannel, then one bridge network per host. Teardown runs in the reverse
//! order. An etcd cluster passed in by the caller is used but never torn
//! down.

use async_trait::async_trait;
use multihost_core::Subnet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cluster::{DeploymentUnit, EtcdCluster, FlannelCluster};
use crate::config::{MaterializerConfig, ProviderConfig};
use crate::error::{OrchestratorError, Result};
use crate::network::materializer::NetworkMaterializer;
use crate::store::{EtcdConnector, StoreConnector};
use crate::topology::{Host, HostNetwork};

/// A multi-host overlay with one local network per host.
///
/// # Example
///
/// ```ignore
/// use multihost_orchestrator::{Host, MultiHostNetworkProvider, ProviderConfig};
///
/// let hosts = vec![
///     Host::docker("tcp://10.0.0.1:2375")?,
///     Host::docker("tcp://10.0.0.2:2375")?,
/// ];
/// let provider = MultiHostNetworkProvider::new(
///     hosts.clone(),
///     "overlay",
///     "10.58.0.0/16".parse()?,
///     8472,
///     ProviderConfig::default(),
/// )?;
///
/// provider.deploy().await?;
/// let network = provider.get_network(&hosts[0]).await?;
/// println!("attach containers to {}", network.name);
/// provider.close().await?;
/// ```
#[derive(Debug)]
pub struct MultiHostNetworkProvider {
    name: String,
    etcd: Arc<EtcdCluster>,
    managed_etcd: bool,
    flannel: Arc<FlannelCluster>,
    materializer: NetworkMaterializer,
    config: MaterializerConfig,
}

impl MultiHostNetworkProvider {
    /// Creates a provider that runs its own etcd cluster named `name`.
    pub fn new(
        hosts: Vec<Host>,
        name: impl Into<String>,
        subnet: Subnet,
        port: u16,
        config: ProviderConfig,
    ) -> Result<Self> {
        let connector = Arc::new(EtcdConnector::new(config.etcd.request_timeout()));
        Self::with_store_connector(hosts, name, subnet, port, config, connector)
    }

    /// Like [`new`](Self::new), reaching etcd through `connector`.
    pub fn with_store_connector(
        hosts: Vec<Host>,
        name: impl Into<String>,
        subnet: Subnet,
        port: u16,
        config: ProviderConfig,
        connector: Arc<dyn StoreConnector>,
    ) -> Result<Self> {
        let name = name.into();
        let etcd = EtcdCluster::with_name(hosts.clone(), &name, config.etcd.clone())?
            .with_connector(connector);
        Self::build(hosts, name, subnet, port, config, Arc::new(etcd), true)
    }

    /// Creates a provider on top of an etcd cluster the caller owns.
    pub fn with_etcd(
        hosts: Vec<Host>,
        name: impl Into<String>,
        subnet: Subnet,
        etcd: Arc<EtcdCluster>,
        port: u16,
        config: ProviderConfig,
    ) -> Result<Self> {
        Self::build(hosts, name.into(), subnet, port, config, etcd, false)
    }

    fn build(
        hosts: Vec<Host>,
        name: String,
        subnet: Subnet,
        port: u16,
        config: ProviderConfig,
        etcd: Arc<EtcdCluster>,
        managed_etcd: bool,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(OrchestratorError::invalid_configuration(
                "network name must not be empty",
            ));
        }
        if port == 0 {
            return Err(OrchestratorError::invalid_configuration(
                "overlay port must not be 0",
            ));
        }

        let flannel = Arc::new(FlannelCluster::new(
            hosts,
            format!("{}-flannel", name),
            etcd.clone(),
            subnet,
            format!("{}/network", name),
            port,
            config.flannel,
        )?);
        let materializer =
            NetworkMaterializer::new(&name, flannel.clone(), config.materializer.clone());

        Ok(Self {
            name,
            etcd,
            managed_etcd,
            flannel,
            materializer,
            config: config.materializer,
        })
    }

    /// Returns the etcd cluster.
    pub fn etcd(&self) -> &Arc<EtcdCluster> {
        &self.etcd
    }

    /// Returns the flannel cluster.
    pub fn flannel(&self) -> &Arc<FlannelCluster> {
        &self.flannel
    }

    /// Returns true if the provider tears its etcd cluster down on close.
    pub fn manages_etcd(&self) -> bool {
        self.managed_etcd
    }

    /// Returns the network materialized on `host`.
    pub async fn get_network(&self, host: &Host) -> Result<HostNetwork> {
        self.materializer.get_network(host).await
    }

    /// Returns every materialized network with its host, in host order.
    pub async fn networks(&self) -> Vec<(Host, HostNetwork)> {
        self.materializer.networks().await
    }

    /// Polls the materializer until every host has a network.
    async fn wait_for_networks(&self) -> Result<()> {
        let deadline = Instant::now() + self.config.allocation_timeout();

        loop {
            match self.materializer.create_networks().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    if Instant::now() >= deadline {
                        return Err(OrchestratorError::timeout(format!(
                            "overlay allocation ({})",
                            e
                        )));
                    }
                    debug!(error = %e, "Allocation not ready, retrying");
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn deploy_all(&self) -> Result<()> {
        if self.managed_etcd && !self.etcd.is_deployed().await {
            self.etcd.deploy().await?;
        }
        self.flannel.deploy().await?;
        self.wait_for_networks().await
    }
}

#[async_trait]
impl DeploymentUnit for MultiHostNetworkProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deploy(&self) -> Result<()> {
        if self.flannel.is_deployed().await {
            return Err(OrchestratorError::already_deployed(&self.name));
        }

        info!(
            name = %self.name,
            hosts = self.flannel.node_count(),
            subnet = %self.flannel.subnet(),
            "Deploying multi-host network"
        );

        match self.deploy_all().await {
            Ok(()) => {
                info!(name = %self.name, "Multi-host network deployed");
                Ok(())
            }
            Err(e) => {
                warn!(name = %self.name, error = %e, "Deploy failed, tearing down");
                if let Err(teardown) = self.close().await {
                    warn!(name = %self.name, error = %teardown, "Teardown incomplete");
                }
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.materializer.close().await {
            errors.push(e.to_string());
        }
        if let Err(e) = self.flannel.close().await {
            errors.push(e.to_string());
        }
        if self.managed_etcd {
            if let Err(e) = self.etcd.close().await {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::teardown_failed(errors.join("; ")))
        }
    }

    async fn is_deployed(&self) -> bool {
        self.flannel.is_deployed().await
    }

    fn node_count(&self) -> usize {
        self.flannel.node_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_hosts, subnet_env, MemoryStore};
    use std::time::Duration;

    fn provider(n: usize) -> (MultiHostNetworkProvider, Vec<Arc<crate::testing::FakeHost>>, Vec<Host>) {
        let (hosts, fakes) = fake_hosts(n);
        let mut config = ProviderConfig::default();
        config.materializer.poll_interval_ms = 100;
        config.materializer.allocation_timeout_secs = 2;
        let provider = MultiHostNetworkProvider::with_store_connector(
            hosts.clone(),
            "overlay",
            "10.58.0.0/16".parse().unwrap(),
            8472,
            config,
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        (provider, fakes, hosts)
    }

    #[tokio::test]
    async fn test_deploy_and_close() {
        let (provider, fakes, hosts) = provider(2);
        provider.deploy().await.unwrap();

        assert!(provider.is_deployed().await);
        assert_eq!(provider.node_count(), 2);
        assert_eq!(provider.flannel().prefix(), "overlay/network");
        assert_eq!(provider.get_network(&hosts[1]).await.unwrap().name, "overlay-2");

        provider.close().await.unwrap();
        provider.close().await.unwrap();
        assert!(!provider.is_deployed().await);
        assert!(!provider.etcd().is_deployed().await);
        for fake in &fakes {
            assert_eq!(fake.container_count(), 0);
            assert_eq!(fake.network_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_deploy_twice_fails_without_teardown() {
        let (provider, fakes, _) = provider(1);
        provider.deploy().await.unwrap();
        assert!(matches!(
            provider.deploy().await,
            Err(OrchestratorError::AlreadyDeployed { .. })
        ));
        assert_eq!(fakes[0].network_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_late_allocation() {
        let (provider, fakes, _) = provider(2);
        fakes[1].set_subnet_env(None);

        let late = fakes[1].clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            late.set_subnet_env(Some(subnet_env("10.58.0.0/16", "10.58.2.1/24", 1450, true)));
        });

        provider.deploy().await.unwrap();
        assert!(fakes[1].networks()[0].ip_masquerade);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allocation_timeout_tears_down() {
        let (provider, fakes, _) = provider(2);
        fakes[1].set_subnet_env(None);

        let err = provider.deploy().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { .. }));
        assert!(!err.is_retryable());
        for fake in &fakes {
            assert_eq!(fake.container_count(), 0);
            assert_eq!(fake.network_count(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exec_timeout_is_not_retried() {
        let (provider, fakes, _) = provider(2);
        fakes[1].fail_exec(true);

        let started = tokio::time::Instant::now();
        let err = provider.deploy().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { .. }));
        assert!(err.is_runtime_failure());

        // Fails on the first pass instead of polling until the deadline.
        assert!(started.elapsed() < Duration::from_millis(100));
        for fake in &fakes {
            assert_eq!(fake.container_count(), 0);
            assert_eq!(fake.network_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_external_etcd_survives_close() {
        let (hosts, fakes) = fake_hosts(2);
        let etcd = Arc::new(
            EtcdCluster::with_name(hosts.clone(), "shared", Default::default())
                .unwrap()
                .with_connector(Arc::new(MemoryStore::new())),
        );
        etcd.deploy().await.unwrap();

        let provider = MultiHostNetworkProvider::with_etcd(
            hosts,
            "overlay",
            "10.58.0.0/16".parse().unwrap(),
            etcd.clone(),
            8472,
            ProviderConfig::default(),
        )
        .unwrap();
        assert!(!provider.manages_etcd());

        provider.deploy().await.unwrap();
        provider.close().await.unwrap();

        assert!(etcd.is_deployed().await);
        assert!(fakes.iter().all(|f| f.container_count() == 1));
    }

    #[test]
    fn test_rejects_bad_arguments() {
        let (hosts, _) = fake_hosts(1);
        let subnet: Subnet = "10.58.0.0/16".parse().unwrap();
        assert!(
            MultiHostNetworkProvider::new(hosts.clone(), "", subnet, 8472, ProviderConfig::default())
                .is_err()
        );
        assert!(
            MultiHostNetworkProvider::new(hosts, "overlay", subnet, 0, ProviderConfig::default())
                .is_err()
        );
        assert!(MultiHostNetworkProvider::new(
            Vec::new(),
            "overlay",
            subnet,
            8472,
            ProviderConfig::default()
        )
        .is_err());
    }
}
