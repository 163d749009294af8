//! flannel distributor.
//!
//! [`FlannelCluster`] publishes the overlay's network configuration record
//! into etcd and runs one privileged, host-networked flannel agent per host.
//! Subnet leasing is left entirely to the agents; each one writes its lease
//! to `subnet.env`, which [`FlannelCluster::read_allocation`] reads back.

use async_trait::async_trait;
use multihost_core::Subnet;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::backend::{ContainerRuntime, ContainerSpec};
use crate::cluster::allocation::OverlayAllocation;
use crate::cluster::etcd::EtcdCluster;
use crate::cluster::unit::DeploymentUnit;
use crate::config::FlannelConfig;
use crate::container::{ensure_image, DeployedAgentRecord, LifecycleManager};
use crate::error::{OrchestratorError, Result};
use crate::topology::Host;

/// The network configuration record flannel reads from `{prefix}/config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkConfigRecord {
    /// The whole overlay range.
    #[serde(rename = "Network")]
    pub network: Subnet,

    /// Backend settings.
    #[serde(rename = "Backend")]
    pub backend: BackendRecord,
}

/// Backend section of [`NetworkConfigRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendRecord {
    /// Backend type, e.g. `vxlan`.
    #[serde(rename = "Type")]
    pub kind: String,

    /// UDP port the backend listens on.
    #[serde(rename = "Port")]
    pub port: u16,

    /// VXLAN network identifier. Set to the port.
    #[serde(rename = "VNI")]
    pub vni: u16,
}

/// One flannel agent per host, configured through etcd.
pub struct FlannelCluster {
    name: String,
    hosts: Vec<Host>,
    etcd: Arc<EtcdCluster>,
    subnet: Subnet,
    prefix: String,
    port: u16,
    config: FlannelConfig,
    lifecycle: LifecycleManager,
    deployed: RwLock<bool>,
}

impl FlannelCluster {
    /// Creates a distributor.
    ///
    /// `name` names every agent container, `prefix` is the etcd key prefix
    /// and `port` is both the backend port and the VNI.
    pub fn new(
        hosts: Vec<Host>,
        name: impl Into<String>,
        etcd: Arc<EtcdCluster>,
        subnet: Subnet,
        prefix: impl Into<String>,
        port: u16,
        config: FlannelConfig,
    ) -> Result<Self> {
        if hosts.is_empty() {
            return Err(OrchestratorError::invalid_configuration(
                "flannel cluster needs at least one host",
            ));
        }

        Ok(Self {
            name: name.into(),
            hosts,
            etcd,
            subnet,
            prefix: prefix.into(),
            port,
            config,
            lifecycle: LifecycleManager::new(),
            deployed: RwLock::new(false),
        })
    }

    /// Returns the whole overlay range.
    pub fn subnet(&self) -> Subnet {
        self.subnet
    }

    /// Returns the etcd key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the etcd cluster the agents consult.
    pub fn etcd(&self) -> &Arc<EtcdCluster> {
        &self.etcd
    }

    /// Returns the key the configuration record is written to.
    pub fn config_key(&self) -> String {
        format!("{}/config", self.prefix)
    }

    /// Returns the network configuration record.
    pub fn config_record(&self) -> NetworkConfigRecord {
        NetworkConfigRecord {
            network: self.subnet,
            backend: BackendRecord {
                kind: self.config.backend.clone(),
                port: self.port,
                vni: self.port,
            },
        }
    }

    /// Returns the agent's command line for `host`.
    pub fn command(&self, host: &Host) -> Vec<String> {
        vec![
            format!("-etcd-prefix={}", self.prefix),
            format!("-etcd-endpoints={}", self.etcd.client_url(host)),
        ]
    }

    /// Returns the deployed agents in host order.
    pub async fn agents(&self) -> Vec<DeployedAgentRecord> {
        self.lifecycle.all().await
    }

    /// Reads and parses the allocation written by `agent`.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::AllocationUnavailable`] if the agent has not
    ///   written its lease yet
    /// - [`OrchestratorError::InvalidConfiguration`] if the lease is malformed
    /// - [`OrchestratorError::Timeout`] if the read does not finish in time
    pub async fn read_allocation(&self, agent: &DeployedAgentRecord) -> Result<OverlayAllocation> {
        let path = self.config.subnet_env_path.as_str();
        let output = agent
            .host
            .client()
            .exec(&agent.container_id, &["cat", path], self.config.exec_timeout())
            .await?;

        if !output.success() {
            debug!(
                host = %agent.host,
                path = %path,
                output = %output.combined_output(),
                "Allocation not readable yet"
            );
            return Err(OrchestratorError::allocation_unavailable(agent.host.endpoint()));
        }

        OverlayAllocation::parse(agent.host.endpoint(), &output.stdout)
    }

    async fn write_config(&self) -> Result<()> {
        let key = self.config_key();
        let record = serde_json::to_string(&self.config_record())?;
        info!(cluster = %self.name, key = %key, record = %record, "Writing network config");

        match self.etcd.set(&key, &record).await {
            Ok(()) => Ok(()),
            Err(e @ OrchestratorError::NotDeployed { .. }) => Err(e),
            Err(e) if self.config.strict_config_write => Err(e),
            Err(e) => {
                warn!(
                    cluster = %self.name,
                    key = %key,
                    error = %e,
                    "Failed to write network config, continuing"
                );
                Ok(())
            }
        }
    }

    async fn deploy_agent(&self, index: usize, host: &Host) -> Result<()> {
        let image = self.config.image();
        info!(cluster = %self.name, host = %host, "Deploying flannel agent");

        ensure_image(host, &image).await?;

        let spec = ContainerSpec::new(&self.name, image.reference())
            .host_network()
            .privileged()
            .cmd(self.command(host));

        let container_id = host.client().create_container(&spec).await?;
        self.lifecycle
            .register(DeployedAgentRecord::new(
                index,
                host.clone(),
                &self.name,
                container_id.clone(),
            ))
            .await;

        host.client().start_container(&container_id).await
    }
}

#[async_trait]
impl DeploymentUnit for FlannelCluster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deploy(&self) -> Result<()> {
        let mut deployed = self.deployed.write().await;
        if *deployed {
            return Err(OrchestratorError::already_deployed(&self.name));
        }

        let result = async {
            self.write_config().await?;
            for (index, host) in self.hosts.iter().enumerate() {
                self.deploy_agent(index, host).await?;
            }
            Ok::<(), OrchestratorError>(())
        }
        .await;

        match result {
            Ok(()) => {
                *deployed = true;
                info!(cluster = %self.name, agents = self.hosts.len(), "flannel deployed");
                Ok(())
            }
            Err(e) => {
                warn!(cluster = %self.name, error = %e, "flannel deploy failed, removing agents");
                if let Err(teardown) = self.lifecycle.teardown().await {
                    warn!(cluster = %self.name, error = %teardown, "Rollback incomplete");
                }
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut deployed = self.deployed.write().await;
        info!(cluster = %self.name, "Deleting flannel containers");
        *deployed = false;
        self.lifecycle.teardown().await
    }

    async fn is_deployed(&self) -> bool {
        *self.deployed.read().await
    }

    fn node_count(&self) -> usize {
        self.hosts.len()
    }
}

impl std::fmt::Debug for FlannelCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlannelCluster")
            .field("name", &self.name)
            .field("subnet", &self.subnet)
            .field("prefix", &self.prefix)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EtcdConfig;
    use crate::testing::{fake_hosts, FakeHost, MemoryStore};

    struct Fixture {
        etcd: Arc<EtcdCluster>,
        flannel: FlannelCluster,
        fakes: Vec<Arc<FakeHost>>,
        store: MemoryStore,
    }

    fn fixture(n: usize, config: FlannelConfig) -> Fixture {
        let (hosts, fakes) = fake_hosts(n);
        let store = MemoryStore::new();
        let etcd = Arc::new(
            EtcdCluster::with_name(hosts.clone(), "net", EtcdConfig::default())
                .unwrap()
                .with_connector(Arc::new(store.clone())),
        );
        let flannel = FlannelCluster::new(
            hosts,
            "net-flannel",
            etcd.clone(),
            "10.58.0.0/16".parse().unwrap(),
            "net/network",
            8472,
            config,
        )
        .unwrap();

        Fixture {
            etcd,
            flannel,
            fakes,
            store,
        }
    }

    #[test]
    fn test_config_record_json() {
        let fx = fixture(1, FlannelConfig::default());
        let json = serde_json::to_value(fx.flannel.config_record()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Network": "10.58.0.0/16",
                "Backend": {"Type": "vxlan", "Port": 8472, "VNI": 8472}
            })
        );
        assert_eq!(fx.flannel.config_key(), "net/network/config");
    }

    #[test]
    fn test_command() {
        let fx = fixture(2, FlannelConfig::default());
        let host = fx.etcd.hosts()[1].clone();
        assert_eq!(
            fx.flannel.command(&host),
            vec![
                "-etcd-prefix=net/network".to_string(),
                "-etcd-endpoints=http://10.0.0.2:2379".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_deploy_writes_config_and_agents() {
        let fx = fixture(3, FlannelConfig::default());
        fx.etcd.deploy().await.unwrap();
        fx.flannel.deploy().await.unwrap();

        // Exact bytes flannel reads back from etcd.
        assert_eq!(
            fx.store.value("net/network/config").unwrap(),
            r#"{"Network":"10.58.0.0/16","Backend":{"Type":"vxlan","Port":8472,"VNI":8472}}"#
        );

        let agents = fx.flannel.agents().await;
        assert_eq!(agents.len(), 3);
        for (i, agent) in agents.iter().enumerate() {
            assert_eq!(agent.index, i);
            assert_eq!(agent.name, "net-flannel");
        }

        for fake in &fx.fakes {
            let flannel = fake
                .containers()
                .into_iter()
                .find(|spec| spec.name == "net-flannel")
                .unwrap();
            assert!(flannel.privileged);
            assert!(flannel.host_network);
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_tolerated() {
        let fx = fixture(2, FlannelConfig::default());
        fx.etcd.deploy().await.unwrap();
        fx.store.fail_puts(true);

        fx.flannel.deploy().await.unwrap();
        assert!(fx.flannel.is_deployed().await);
        assert_eq!(fx.flannel.agents().await.len(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal_when_strict() {
        let config = FlannelConfig {
            strict_config_write: true,
            ..Default::default()
        };
        let fx = fixture(2, config);
        fx.etcd.deploy().await.unwrap();
        fx.store.fail_puts(true);

        assert!(matches!(
            fx.flannel.deploy().await,
            Err(OrchestratorError::Store(_))
        ));
        assert!(fx.flannel.agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_undeployed_etcd_is_fatal() {
        let fx = fixture(1, FlannelConfig::default());
        assert!(matches!(
            fx.flannel.deploy().await,
            Err(OrchestratorError::NotDeployed { .. })
        ));
    }

    #[tokio::test]
    async fn test_agent_failure_removes_every_agent() {
        let fx = fixture(3, FlannelConfig::default());
        fx.etcd.deploy().await.unwrap();
        fx.fakes[1].fail_create(true);

        let err = fx.flannel.deploy().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ContainerCreationFailed { .. }));
        assert!(!fx.flannel.is_deployed().await);
        assert!(fx.flannel.agents().await.is_empty());

        // etcd is left alone.
        assert!(fx.etcd.is_deployed().await);
        assert!(fx.fakes.iter().all(|f| f.container_count() == 1));
    }

    #[tokio::test]
    async fn test_read_allocation() {
        let fx = fixture(2, FlannelConfig::default());
        fx.etcd.deploy().await.unwrap();
        fx.flannel.deploy().await.unwrap();
        let agents = fx.flannel.agents().await;

        let allocation = fx.flannel.read_allocation(&agents[1]).await.unwrap();
        assert_eq!(allocation.subnet.to_string(), "10.58.2.1/24");
        assert_eq!(allocation.mtu, 1450);

        fx.fakes[0].set_subnet_env(None);
        assert!(matches!(
            fx.flannel.read_allocation(&agents[0]).await,
            Err(OrchestratorError::AllocationUnavailable { .. })
        ));

        fx.fakes[0].set_subnet_env(Some("FLANNEL_MTU=1450\n".to_string()));
        assert!(matches!(
            fx.flannel.read_allocation(&agents[0]).await,
            Err(OrchestratorError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_close_leaves_etcd_running() {
        let fx = fixture(2, FlannelConfig::default());
        fx.flannel.close().await.unwrap();

        fx.etcd.deploy().await.unwrap();
        fx.flannel.deploy().await.unwrap();
        fx.flannel.close().await.unwrap();
        fx.flannel.close().await.unwrap();

        assert!(!fx.flannel.is_deployed().await);
        assert!(fx.etcd.is_deployed().await);
        assert!(fx.fakes.iter().all(|f| f.container_count() == 1));
    }
}
