//! In-memory hosts and stores.
//!
//! [`FakeHost`] and [`MemoryStore`] stand in for a Docker daemon and an etcd
//! cluster, so the whole pipeline can be driven without either. Failures are
//! injected per host with the `fail_*` switches.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::backend::{ContainerRuntime, ContainerSpec, ExecOutput, NetworkFabric, NetworkRequest};
use crate::error::{OrchestratorError, Result};
use crate::store::{KeyValueStore, StoreConnector};
use crate::topology::Host;

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: ContainerSpec,
    running: bool,
}

#[derive(Debug, Default)]
struct HostState {
    next_id: u64,
    images: HashSet<String>,
    pulls: usize,
    containers: Vec<(String, FakeContainer)>,
    networks: Vec<(String, NetworkRequest)>,
    subnet_env: Option<String>,
    fail_create: bool,
    fail_start: bool,
    fail_destroy: bool,
    fail_network_create: bool,
    fail_exec: bool,
}

impl HostState {
    fn next_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}{:015x}", kind, self.next_id)
    }
}

/// A container host that keeps everything in memory.
///
/// `cat` executed in any running container prints the configured subnet
/// file, or exits with 1 when none is set.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    /// Creates a host with no subnet file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a host whose agents report `contents` as their subnet file.
    pub fn with_subnet_env(contents: impl Into<String>) -> Self {
        let host = Self::new();
        host.set_subnet_env(Some(contents.into()));
        host
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the subnet file. `None` makes reads fail.
    pub fn set_subnet_env(&self, contents: Option<String>) {
        self.state().subnet_env = contents;
    }

    /// Makes container creation fail.
    pub fn fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    /// Makes container start fail.
    pub fn fail_start(&self, fail: bool) {
        self.state().fail_start = fail;
    }

    /// Makes container removal fail.
    pub fn fail_destroy(&self, fail: bool) {
        self.state().fail_destroy = fail;
    }

    /// Makes exec time out.
    pub fn fail_exec(&self, fail: bool) {
        self.state().fail_exec = fail;
    }

    /// Makes network creation fail.
    pub fn fail_network_create(&self, fail: bool) {
        self.state().fail_network_create = fail;
    }

    /// Number of containers that exist.
    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    /// Number of containers that are running.
    pub fn running_count(&self) -> usize {
        self.state().containers.iter().filter(|(_, c)| c.running).count()
    }

    /// Specs of every existing container, in creation order.
    pub fn containers(&self) -> Vec<ContainerSpec> {
        self.state()
            .containers
            .iter()
            .map(|(_, c)| c.spec.clone())
            .collect()
    }

    /// Number of networks that exist.
    pub fn network_count(&self) -> usize {
        self.state().networks.len()
    }

    /// Requests of every existing network, in creation order.
    pub fn networks(&self) -> Vec<NetworkRequest> {
        self.state()
            .networks
            .iter()
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Number of image pulls performed.
    pub fn pull_count(&self) -> usize {
        self.state().pulls
    }
}

#[async_trait]
impl ContainerRuntime for FakeHost {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.state().images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut state = self.state();
        state.pulls += 1;
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state();
        if state.fail_create {
            return Err(OrchestratorError::container_creation_failed(
                &spec.name,
                "injected failure",
            ));
        }
        if state.containers.iter().any(|(_, c)| c.spec.name == spec.name) {
            return Err(OrchestratorError::container_creation_failed(
                &spec.name,
                "name already in use",
            ));
        }

        let id = state.next_id("c");
        state.containers.push((
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                running: false,
            },
        ));
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_start {
            return Err(OrchestratorError::container_start_failed(
                container_id,
                "injected failure",
            ));
        }
        match state.containers.iter_mut().find(|(id, _)| id == container_id) {
            Some((_, container)) => {
                container.running = true;
                Ok(())
            }
            None => Err(OrchestratorError::container_start_failed(
                container_id,
                "no such container",
            )),
        }
    }

    async fn destroy_container(&self, container_id: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_destroy {
            return Err(OrchestratorError::container_removal_failed(
                container_id,
                "injected failure",
            ));
        }
        state.containers.retain(|(id, _)| id != container_id);
        Ok(())
    }

    async fn exec(&self, container_id: &str, cmd: &[&str], _timeout: Duration) -> Result<ExecOutput> {
        let state = self.state();
        if state.fail_exec {
            return Err(OrchestratorError::timeout(format!(
                "exec {:?} in container {}",
                cmd, container_id
            )));
        }
        let running = state
            .containers
            .iter()
            .any(|(id, c)| id == container_id && c.running);
        if !running {
            return Err(OrchestratorError::exec_failed(
                container_id,
                "container is not running",
            ));
        }

        match cmd.first() {
            Some(&"cat") => match &state.subnet_env {
                Some(contents) => Ok(ExecOutput::new(contents.as_str(), "", 0)),
                None => {
                    let path = cmd.get(1).copied().unwrap_or_default();
                    Ok(ExecOutput::new(
                        "",
                        format!("cat: {}: No such file or directory", path),
                        1,
                    ))
                }
            },
            _ => Ok(ExecOutput::new("", "", 0)),
        }
    }
}

#[async_trait]
impl NetworkFabric for FakeHost {
    async fn create_network(&self, request: &NetworkRequest) -> Result<String> {
        let mut state = self.state();
        if state.fail_network_create {
            return Err(OrchestratorError::network_creation_failed(
                &request.name,
                "injected failure",
            ));
        }
        let id = state.next_id("n");
        state.networks.push((id.clone(), request.clone()));
        Ok(id)
    }

    async fn destroy_network(&self, network_id: &str) -> Result<()> {
        self.state().networks.retain(|(id, _)| id != network_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StoreState {
    values: HashMap<String, String>,
    connections: Vec<String>,
    fail_puts: bool,
}

/// A shared in-memory key/value store.
///
/// Clones share state. As a [`StoreConnector`] it hands out clones of itself
/// and records every endpoint it was asked to connect to.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the value under `key`.
    pub fn value(&self, key: &str) -> Option<String> {
        self.state().values.get(key).cloned()
    }

    /// Endpoints passed to `connect`, in order.
    pub fn connections(&self) -> Vec<String> {
        self.state().connections.clone()
    }

    /// Makes writes fail.
    pub fn fail_puts(&self, fail: bool) {
        self.state().fail_puts = fail;
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_puts {
            return Err(OrchestratorError::store(format!("injected failure writing {}", key)));
        }
        state.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        self.state()
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| OrchestratorError::key_not_found(key))
    }
}

impl StoreConnector for MemoryStore {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn KeyValueStore>> {
        self.state().connections.push(endpoint.to_string());
        let store: Arc<dyn KeyValueStore> = Arc::new(self.clone());
        Ok(store)
    }
}

/// Renders a subnet file the way the overlay agent writes it.
pub fn subnet_env(network: &str, subnet: &str, mtu: u32, ip_masq: bool) -> String {
    format!(
        "FLANNEL_NETWORK={}\nFLANNEL_SUBNET={}\nFLANNEL_MTU={}\nFLANNEL_IPMASQ={}\n",
        network, subnet, mtu, ip_masq
    )
}

/// Creates `n` fake hosts at `tcp://10.0.0.{i+1}:2375`.
///
/// Host `i` leases `10.58.{i+1}.1/24` out of `10.58.0.0/16`.
pub fn fake_hosts(n: usize) -> (Vec<Host>, Vec<Arc<FakeHost>>) {
    (0..n)
        .map(|i| {
            let fake = Arc::new(FakeHost::with_subnet_env(subnet_env(
                "10.58.0.0/16",
                &format!("10.58.{}.1/24", i + 1),
                1450,
                false,
            )));
            let host = Host::new(
                format!("tcp://10.0.0.{}:2375", i + 1),
                format!("10.0.0.{}", i + 1),
                fake.clone(),
            );
            (host, fake)
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_requires_running_container() {
        let fake = FakeHost::with_subnet_env("FLANNEL_MTU=1450\n");
        let id = fake
            .create_container(&ContainerSpec::new("agent", "flannel"))
            .await
            .unwrap();

        let timeout = Duration::from_secs(1);
        assert!(fake.exec(&id, &["cat", "/x"], timeout).await.is_err());

        fake.start_container(&id).await.unwrap();
        let output = fake.exec(&id, &["cat", "/x"], timeout).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "FLANNEL_MTU=1450\n");

        fake.set_subnet_env(None);
        let output = fake.exec(&id, &["cat", "/x"], timeout).await.unwrap();
        assert_eq!(output.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_memory_store_shares_state() {
        let store = MemoryStore::new();
        let client = store.connect("http://10.0.0.1:2379").unwrap();
        client.put("k", "v").await.unwrap();

        assert_eq!(store.value("k"), Some("v".to_string()));
        assert_eq!(store.connections(), vec!["http://10.0.0.1:2379".to_string()]);
        assert!(matches!(
            client.get("missing").await,
            Err(OrchestratorError::KeyNotFound(_))
        ));
    }
}
