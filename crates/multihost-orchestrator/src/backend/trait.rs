//! Host client trait definitions.
//!
//! Every host exposes two narrow capabilities: a container runtime and a
//! network fabric. The orchestration units only ever talk to a host through
//! these traits, which keeps Docker out of the deployment logic and lets the
//! whole pipeline run against in-memory fakes.

use async_trait::async_trait;
use multihost_core::Subnet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Container operations a host must provide.
///
/// # Lifecycle
///
/// 1. `image_exists()` / `pull_image()` to make the image available
/// 2. `create_container()` to obtain an ID
/// 3. `start_container()` to run it
/// 4. `exec()` to read state from inside it
/// 5. `destroy_container()` to force-remove it
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; hosts are shared between units
/// behind `Arc`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns true if `image` is present on the host.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pulls `image` and waits for the pull to finish.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Creates a container and returns its runtime ID. The container is not
    /// started.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Starts a created container.
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stops and removes a container. Removing a container that no longer
    /// exists succeeds.
    async fn destroy_container(&self, container_id: &str) -> Result<()>;

    /// Runs `cmd` inside a running container.
    ///
    /// The call returns within `timeout`, failing with
    /// [`OrchestratorError::Timeout`](crate::error::OrchestratorError::Timeout)
    /// otherwise.
    async fn exec(&self, container_id: &str, cmd: &[&str], timeout: Duration)
        -> Result<ExecOutput>;
}

/// Network operations a host must provide.
#[async_trait]
pub trait NetworkFabric: Send + Sync {
    /// Creates a host-local bridge network and returns its ID.
    async fn create_network(&self, request: &NetworkRequest) -> Result<String>;

    /// Removes a network. Removing a network that no longer exists succeeds.
    async fn destroy_network(&self, network_id: &str) -> Result<()>;
}

/// Everything the orchestrator needs from one host.
pub trait HostClient: ContainerRuntime + NetworkFabric {}

impl<T: ContainerRuntime + NetworkFabric + ?Sized> HostClient for T {}

/// Parameters for creating a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,

    /// Image reference.
    pub image: String,

    /// Environment as `KEY=VALUE` entries.
    pub env: Vec<String>,

    /// Whether the container shares the host's network namespace.
    pub host_network: bool,

    /// Whether the container runs privileged.
    pub privileged: bool,

    /// Command arguments passed to the image entrypoint.
    pub cmd: Vec<String>,
}

impl ContainerSpec {
    /// Creates a spec with no environment, no command and default isolation.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Sets the environment.
    pub fn env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    /// Runs the container in the host's network namespace.
    pub fn host_network(mut self) -> Self {
        self.host_network = true;
        self
    }

    /// Runs the container privileged.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Sets the command.
    pub fn cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }

    /// Looks up an environment entry by key.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// Parameters for creating a per-host network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    /// Network name.
    pub name: String,

    /// IPAM subnet for the network.
    pub subnet: Subnet,

    /// MTU for the bridge.
    pub mtu: u32,

    /// Whether the bridge masquerades outbound traffic.
    pub ip_masquerade: bool,
}

/// Output from executing a command in a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: Vec<u8>,

    /// Standard error from the command.
    pub stderr: Vec<u8>,

    /// Exit code of the command, if the runtime reported one.
    pub exit_code: Option<i64>,
}

impl ExecOutput {
    /// Creates a new exec output.
    pub fn new(stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>, exit_code: i64) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    /// Returns true if the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Returns stdout as text, replacing invalid UTF-8.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Returns the combined stdout and stderr.
    pub fn combined_output(&self) -> String {
        let stdout = String::from_utf8_lossy(&self.stdout);
        let stderr = String::from_utf8_lossy(&self.stderr);
        if stderr.is_empty() {
            stdout.into_owned()
        } else if stdout.is_empty() {
            stderr.into_owned()
        } else {
            format!("{}\n{}", stdout, stderr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_spec_builder() {
        let spec = ContainerSpec::new("flannel", "quay.io/coreos/flannel:v0.13.1-rc1")
            .host_network()
            .privileged()
            .cmd(vec!["-etcd-prefix=net/network".to_string()]);

        assert!(spec.host_network);
        assert!(spec.privileged);
        assert!(spec.env.is_empty());
        assert_eq!(spec.cmd, vec!["-etcd-prefix=net/network"]);
    }

    #[test]
    fn test_env_value_lookup() {
        let spec = ContainerSpec::new("etcd-0", "etcd").env(vec![
            "ETCD_NAME=etcd-0".to_string(),
            "ETCD_INITIAL_CLUSTER=etcd-0=http://10.0.0.1:2380".to_string(),
        ]);

        assert_eq!(spec.env_value("ETCD_NAME"), Some("etcd-0"));
        assert_eq!(
            spec.env_value("ETCD_INITIAL_CLUSTER"),
            Some("etcd-0=http://10.0.0.1:2380")
        );
        assert_eq!(spec.env_value("ETCD"), None);
    }

    #[test]
    fn test_exec_output() {
        let output = ExecOutput::new("hello\nworld", "", 0);
        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "hello\nworld");

        let output = ExecOutput::new("", "error", 1);
        assert!(!output.success());
        assert_eq!(output.combined_output(), "error");

        assert!(!ExecOutput::default().success());
    }

    #[test]
    fn test_exec_output_combined() {
        let output = ExecOutput::new("out", "err", 0);
        assert_eq!(output.combined_output(), "out\nerr");
    }
}
