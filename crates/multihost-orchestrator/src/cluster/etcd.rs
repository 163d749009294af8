//! etcd bootstrapper.
//!
//! [`EtcdCluster`] runs one etcd member per host and forms them into a single
//! static-membership cluster. Every member is configured with the same
//! `ETCD_INITIAL_CLUSTER` string, computed once before any container exists.
//! All members are created first and only then started, so no member boots
//! with a partial peer list.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::backend::{ContainerRuntime, ContainerSpec};
use crate::cluster::unit::DeploymentUnit;
use crate::config::EtcdConfig;
use crate::container::{ensure_image, DeployedAgentRecord, LifecycleManager};
use crate::error::{OrchestratorError, Result};
use crate::store::{EtcdConnector, KeyValueStore, StoreConnector};
use crate::topology::Host;

#[derive(Default)]
struct EtcdState {
    deployed: bool,
    client: Option<Arc<dyn KeyValueStore>>,
}

/// A static etcd cluster spanning a list of hosts.
pub struct EtcdCluster {
    name: String,
    hosts: Vec<Host>,
    config: EtcdConfig,
    connector: Arc<dyn StoreConnector>,
    lifecycle: LifecycleManager,
    state: RwLock<EtcdState>,
}

impl EtcdCluster {
    /// Creates a cluster named after `config.cluster_name`.
    pub fn new(hosts: Vec<Host>, config: EtcdConfig) -> Result<Self> {
        let name = config.cluster_name.clone();
        Self::with_name(hosts, name, config)
    }

    /// Creates a cluster with an explicit name.
    pub fn with_name(hosts: Vec<Host>, name: impl Into<String>, config: EtcdConfig) -> Result<Self> {
        if hosts.is_empty() {
            return Err(OrchestratorError::invalid_configuration(
                "etcd cluster needs at least one host",
            ));
        }
        if config.client_port == config.peer_port {
            return Err(OrchestratorError::invalid_configuration(format!(
                "etcd client and peer ports must differ, both are {}",
                config.client_port
            )));
        }

        let connector = Arc::new(EtcdConnector::new(config.request_timeout()));
        Ok(Self {
            name: name.into(),
            hosts,
            config,
            connector,
            lifecycle: LifecycleManager::new(),
            state: RwLock::new(EtcdState::default()),
        })
    }

    /// Replaces the connector used to reach the first member.
    pub fn with_connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Returns the hosts in member order.
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Returns the cluster settings.
    pub fn config(&self) -> &EtcdConfig {
        &self.config
    }

    /// Returns the member name for host `index`.
    pub fn node_name(&self, index: usize) -> String {
        format!("{}-{}", self.config.node_prefix, index)
    }

    /// Returns `host`'s peer URL.
    pub fn peer_url(&self, host: &Host) -> String {
        host.http_url(self.config.peer_port)
    }

    /// Returns `host`'s client URL.
    pub fn client_url(&self, host: &Host) -> String {
        host.http_url(self.config.client_port)
    }

    /// Returns the client URL of the first member, which serves
    /// [`get`](Self::get) and [`set`](Self::set).
    pub fn client_endpoint(&self) -> String {
        // The constructor rejects an empty host list.
        self.client_url(&self.hosts[0])
    }

    /// Returns `name0=peer0,name1=peer1,...` for every member.
    pub fn initial_cluster(&self) -> String {
        self.hosts
            .iter()
            .enumerate()
            .map(|(i, host)| format!("{}={}", self.node_name(i), self.peer_url(host)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Returns the environment for member `index`.
    pub fn node_env(&self, index: usize, host: &Host, initial_cluster: &str) -> Vec<String> {
        vec![
            format!("ETCD_NAME={}", self.node_name(index)),
            format!("ETCD_LISTEN_CLIENT_URLS=http://0.0.0.0:{}", self.config.client_port),
            format!("ETCD_LISTEN_PEER_URLS=http://0.0.0.0:{}", self.config.peer_port),
            format!("ETCD_INITIAL_ADVERTISE_PEER_URLS={}", self.peer_url(host)),
            format!("ETCD_INITIAL_CLUSTER_TOKEN={}", self.name),
            format!("ETCD_INITIAL_CLUSTER={}", initial_cluster),
            "ETCD_INITIAL_CLUSTER_STATE=new".to_string(),
            format!("ETCD_ADVERTISE_CLIENT_URLS={}", self.client_url(host)),
        ]
    }

    /// Returns the containers created by the last deploy.
    pub async fn members(&self) -> Vec<DeployedAgentRecord> {
        self.lifecycle.all().await
    }

    /// Reads `key` from the cluster.
    pub async fn get(&self, key: &str) -> Result<String> {
        self.client().await?.get(key).await
    }

    /// Writes `value` under `key`.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.client().await?.put(key, value).await
    }

    async fn client(&self) -> Result<Arc<dyn KeyValueStore>> {
        let state = self.state.read().await;
        match (&state.client, state.deployed) {
            (Some(client), true) => Ok(Arc::clone(client)),
            _ => Err(OrchestratorError::not_deployed(&self.name)),
        }
    }

    async fn create_members(&self, initial_cluster: &str) -> Result<()> {
        let image = self.config.image();

        for (index, host) in self.hosts.iter().enumerate() {
            let node_name = self.node_name(index);
            info!(cluster = %self.name, host = %host, node = %node_name, "Deploying etcd member");

            ensure_image(host, &image).await?;

            let spec = ContainerSpec::new(&node_name, image.reference())
                .env(self.node_env(index, host, initial_cluster))
                .host_network();

            let container_id = host.client().create_container(&spec).await?;
            self.lifecycle
                .register(DeployedAgentRecord::new(
                    index,
                    host.clone(),
                    node_name,
                    container_id,
                ))
                .await;
        }

        Ok(())
    }

    async fn start_members(&self) -> Result<()> {
        info!(cluster = %self.name, "Starting etcd members");
        for record in self.lifecycle.all().await {
            record
                .host
                .client()
                .start_container(&record.container_id)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DeploymentUnit for EtcdCluster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deploy(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.deployed {
            return Err(OrchestratorError::already_deployed(&self.name));
        }

        let initial_cluster = self.initial_cluster();
        info!(
            cluster = %self.name,
            members = self.hosts.len(),
            initial_cluster = %initial_cluster,
            "Deploying etcd cluster"
        );

        let result = async {
            self.create_members(&initial_cluster).await?;
            self.start_members().await?;
            self.connector.connect(&self.client_endpoint())
        }
        .await;

        match result {
            Ok(client) => {
                state.client = Some(client);
                state.deployed = true;
                info!(cluster = %self.name, "etcd cluster deployed");
                Ok(())
            }
            Err(e) => {
                warn!(cluster = %self.name, error = %e, "etcd deploy failed, removing members");
                if let Err(teardown) = self.lifecycle.teardown().await {
                    warn!(cluster = %self.name, error = %teardown, "Rollback incomplete");
                }
                *state = EtcdState::default();
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        info!(cluster = %self.name, "Deleting etcd containers");
        *state = EtcdState::default();
        self.lifecycle.teardown().await
    }

    async fn is_deployed(&self) -> bool {
        self.state.read().await.deployed
    }

    fn node_count(&self) -> usize {
        self.hosts.len()
    }
}

impl std::fmt::Debug for EtcdCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdCluster")
            .field("name", &self.name)
            .field("hosts", &self.hosts)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_hosts, MemoryStore};

    fn cluster(n: usize) -> (EtcdCluster, Vec<Arc<crate::testing::FakeHost>>, MemoryStore) {
        let (hosts, fakes) = fake_hosts(n);
        let store = MemoryStore::new();
        let cluster = EtcdCluster::with_name(hosts, "test-cluster", EtcdConfig::default())
            .unwrap()
            .with_connector(Arc::new(store.clone()));
        (cluster, fakes, store)
    }

    #[test]
    fn test_initial_cluster() {
        let (cluster, _, _) = cluster(3);
        assert_eq!(
            cluster.initial_cluster(),
            "etcd-0=http://10.0.0.1:2380,etcd-1=http://10.0.0.2:2380,etcd-2=http://10.0.0.3:2380"
        );
        assert_eq!(cluster.client_endpoint(), "http://10.0.0.1:2379");
    }

    #[test]
    fn test_node_env() {
        let (cluster, _, _) = cluster(2);
        let host = &cluster.hosts()[1];
        let env = cluster.node_env(1, host, "X");
        assert_eq!(
            env,
            vec![
                "ETCD_NAME=etcd-1",
                "ETCD_LISTEN_CLIENT_URLS=http://0.0.0.0:2379",
                "ETCD_LISTEN_PEER_URLS=http://0.0.0.0:2380",
                "ETCD_INITIAL_ADVERTISE_PEER_URLS=http://10.0.0.2:2380",
                "ETCD_INITIAL_CLUSTER_TOKEN=test-cluster",
                "ETCD_INITIAL_CLUSTER=X",
                "ETCD_INITIAL_CLUSTER_STATE=new",
                "ETCD_ADVERTISE_CLIENT_URLS=http://10.0.0.2:2379",
            ]
        );
    }

    #[test]
    fn test_rejects_bad_construction() {
        assert!(EtcdCluster::new(Vec::new(), EtcdConfig::default()).is_err());

        let (hosts, _) = fake_hosts(1);
        let config = EtcdConfig {
            peer_port: 2379,
            ..Default::default()
        };
        assert!(EtcdCluster::new(hosts, config).is_err());
    }

    #[tokio::test]
    async fn test_deploy_starts_every_member() {
        let (cluster, fakes, store) = cluster(3);
        cluster.deploy().await.unwrap();

        assert!(cluster.is_deployed().await);
        assert_eq!(cluster.members().await.len(), 3);

        let expected = cluster.initial_cluster();
        for fake in &fakes {
            assert_eq!(fake.running_count(), 1);
            let specs = fake.containers();
            let spec = &specs[0];
            assert!(spec.host_network);
            assert_eq!(spec.env_value("ETCD_INITIAL_CLUSTER"), Some(expected.as_str()));
        }
        assert_eq!(store.connections(), vec!["http://10.0.0.1:2379".to_string()]);
    }

    #[tokio::test]
    async fn test_deploy_twice_fails() {
        let (cluster, _, _) = cluster(1);
        cluster.deploy().await.unwrap();
        assert!(matches!(
            cluster.deploy().await,
            Err(OrchestratorError::AlreadyDeployed { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_failure_rolls_back() {
        let (cluster, fakes, _) = cluster(3);
        fakes[2].fail_start(true);

        let err = cluster.deploy().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ContainerStartFailed { .. }));
        assert!(!cluster.is_deployed().await);
        for fake in &fakes {
            assert_eq!(fake.container_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_get_set_require_deploy() {
        let (cluster, _, store) = cluster(2);
        assert!(matches!(
            cluster.set("a", "1").await,
            Err(OrchestratorError::NotDeployed { .. })
        ));
        assert!(matches!(
            cluster.get("a").await,
            Err(OrchestratorError::NotDeployed { .. })
        ));

        cluster.deploy().await.unwrap();
        cluster.set("a", "1").await.unwrap();
        assert_eq!(cluster.get("a").await.unwrap(), "1");
        assert_eq!(store.value("a"), Some("1".to_string()));
        assert!(matches!(
            cluster.get("missing").await,
            Err(OrchestratorError::KeyNotFound(_))
        ));

        cluster.close().await.unwrap();
        assert!(matches!(
            cluster.get("a").await,
            Err(OrchestratorError::NotDeployed { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (cluster, fakes, _) = cluster(2);
        cluster.close().await.unwrap();

        cluster.deploy().await.unwrap();
        cluster.close().await.unwrap();
        cluster.close().await.unwrap();

        assert!(!cluster.is_deployed().await);
        assert!(fakes.iter().all(|f| f.container_count() == 0));

        // A closed cluster can be deployed again.
        cluster.deploy().await.unwrap();
        assert!(cluster.is_deployed().await);
    }
}
