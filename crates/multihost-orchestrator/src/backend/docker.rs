//! Docker host client.
//!
//! [`DockerHost`] implements [`ContainerRuntime`] and [`NetworkFabric`] over
//! the Docker Engine API via bollard. One instance talks to one daemon.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::network::CreateNetworkOptions;
use bollard::service::{HostConfig, Ipam, IpamConfig};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::r#trait::{
    ContainerRuntime, ContainerSpec, ExecOutput, NetworkFabric, NetworkRequest,
};
use crate::error::{OrchestratorError, Result};

/// Docker driver option toggling outbound masquerade on a bridge.
pub const OPT_IP_MASQUERADE: &str = "com.docker.network.bridge.enable_ip_masquerade";

/// Docker driver option setting the bridge MTU.
pub const OPT_MTU: &str = "com.docker.network.driver.mtu";

/// Default timeout for Docker API requests, in seconds.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 120;

/// A container runtime and network fabric backed by one Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerHost {
    docker: Docker,
    endpoint: String,
}

impl DockerHost {
    /// Connects to the daemon at `endpoint`.
    ///
    /// `unix://` endpoints use the local socket; `tcp://` and `http://`
    /// endpoints use plain HTTP. The connection is lazy, so this does not
    /// fail when the daemon is down.
    pub fn connect(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        let docker = if endpoint.starts_with("unix://") {
            Docker::connect_with_unix(endpoint, timeout_secs, bollard::API_DEFAULT_VERSION)?
        } else {
            Docker::connect_with_http(endpoint, timeout_secs, bollard::API_DEFAULT_VERSION)?
        };

        debug!(endpoint = %endpoint, "Created Docker client");

        Ok(Self {
            docker,
            endpoint: endpoint.to_string(),
        })
    }

    /// Returns the daemon endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the underlying bollard client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    async fn run_exec(&self, container_id: &str, cmd: &[&str]) -> Result<ExecOutput> {
        let exec_options = CreateExecOptions {
            cmd: Some(cmd.iter().map(|s| s.to_string()).collect::<Vec<String>>()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_options)
            .await
            .map_err(|e| OrchestratorError::exec_failed(container_id, e.to_string()))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| OrchestratorError::exec_failed(container_id, e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(result) = output.next().await {
                match result {
                    Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                    Ok(_) => {}
                    Err(e) => {
                        return Err(OrchestratorError::exec_failed(container_id, e.to_string()));
                    }
                }
            }
        }

        let exec_inspect = self.docker.inspect_exec(&exec.id).await?;

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: exec_inspect.exit_code,
        })
    }
}

/// Returns true for a 404 from the daemon.
fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerRuntime for DockerHost {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(endpoint = %self.endpoint, image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    return Err(OrchestratorError::image_pull_failed(image, e.to_string()));
                }
            }
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let host_config = HostConfig {
            network_mode: spec.host_network.then(|| "host".to_string()),
            privileged: Some(spec.privileged),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| OrchestratorError::container_creation_failed(&spec.name, e.to_string()))?;

        info!(
            endpoint = %self.endpoint,
            container = %spec.name,
            id = %response.id,
            "Created container"
        );

        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| OrchestratorError::container_start_failed(container_id, e.to_string()))?;

        info!(endpoint = %self.endpoint, container = %container_id, "Started container");
        Ok(())
    }

    async fn destroy_container(&self, container_id: &str) -> Result<()> {
        let remove_options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self
            .docker
            .remove_container(container_id, Some(remove_options))
            .await
        {
            Ok(()) => {
                info!(endpoint = %self.endpoint, container = %container_id, "Removed container");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                debug!(container = %container_id, "Container already gone");
                Ok(())
            }
            Err(e) => Err(OrchestratorError::container_removal_failed(
                container_id,
                e.to_string(),
            )),
        }
    }

    async fn exec(
        &self,
        container_id: &str,
        cmd: &[&str],
        timeout: Duration,
    ) -> Result<ExecOutput> {
        debug!(
            endpoint = %self.endpoint,
            container = %container_id,
            cmd = ?cmd,
            "Executing command"
        );

        tokio::time::timeout(timeout, self.run_exec(container_id, cmd))
            .await
            .map_err(|_| {
                OrchestratorError::timeout(format!("exec {:?} in container {}", cmd, container_id))
            })?
    }
}

#[async_trait]
impl NetworkFabric for DockerHost {
    async fn create_network(&self, request: &NetworkRequest) -> Result<String> {
        let ipam = ipam_config(request);
        let options: HashMap<String, String> = network_options(request);

        let config = CreateNetworkOptions {
            name: request.name.clone(),
            driver: "bridge".to_string(),
            ipam,
            options,
            ..Default::default()
        };

        let response = self
            .docker
            .create_network(config)
            .await
            .map_err(|e| OrchestratorError::network_creation_failed(&request.name, e.to_string()))?;

        let id = created_network_id(&request.name, response.id)?;

        info!(
            endpoint = %self.endpoint,
            network = %request.name,
            id = %id,
            subnet = %request.subnet,
            "Created network"
        );
        Ok(id)
    }

    async fn destroy_network(&self, network_id: &str) -> Result<()> {
        match self.docker.remove_network(network_id).await {
            Ok(()) => {
                info!(endpoint = %self.endpoint, network = %network_id, "Removed network");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(OrchestratorError::network_removal_failed(
                network_id,
                e.to_string(),
            )),
        }
    }
}

/// Extracts the ID from a network create response. The daemon may omit it.
fn created_network_id(name: &str, id: Option<String>) -> Result<String> {
    match id.filter(|id| !id.is_empty()) {
        Some(id) => Ok(id),
        None => Err(OrchestratorError::network_creation_failed(
            name,
            "no ID returned",
        )),
    }
}

/// Builds the IPAM block for a network request.
///
/// The lease names the bridge address (`10.58.1.1/24`). Docker wants the
/// masked range as the subnet, so the lease address becomes the gateway.
pub fn ipam_config(request: &NetworkRequest) -> Ipam {
    Ipam {
        config: Some(vec![IpamConfig {
            subnet: Some(request.subnet.network().to_string()),
            gateway: Some(request.subnet.address().to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Builds the bridge driver options for a network request.
pub fn network_options(request: &NetworkRequest) -> HashMap<String, String> {
    HashMap::from([
        (OPT_IP_MASQUERADE.to_string(), request.ip_masquerade.to_string()),
        (OPT_MTU.to_string(), request.mtu.to_string()),
    ])
}
