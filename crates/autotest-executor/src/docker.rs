//! Docker launcher implementation.

use async_trait::async_trait;
use autotest_core::launcher::*;
use autotest_core::{Error, JobId, Result};
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, NetworkingConfig, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointIpamConfig, EndpointSettings, HostConfig};
use futures::StreamExt;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// Launches grading containers on the local Docker daemon.
///
/// Every container is attached to a user-defined network with a static
/// address so the rendezvous server can recognize its connection.
pub struct DockerLauncher {
    docker: Docker,
    network: String,
}

impl DockerLauncher {
    /// Connect to the local Docker daemon.
    pub fn new(network: impl Into<String>) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self {
            docker,
            network: network.into(),
        })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker, network: impl Into<String>) -> Self {
        Self {
            docker,
            network: network.into(),
        }
    }

    fn container_name(job_id: &JobId) -> String {
        format!("autotest-job-{}", job_id)
    }

    async fn pull_image(&self, image: &str) {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        // Grading images are usually built locally, so a failed pull is not fatal.
        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    warn!(image = %image, error = %e, "Pull warning");
                }
            }
        }
    }
}

/// Environment in `KEY=value` form, sorted for stable container configs.
fn container_env(env: &HashMap<String, String>) -> Vec<String> {
    let mut vars: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    vars.sort();
    vars
}

fn endpoint_settings(address: IpAddr) -> EndpointSettings {
    let ipam_config = match address {
        IpAddr::V4(v4) => EndpointIpamConfig {
            ipv4_address: Some(v4.to_string()),
            ..Default::default()
        },
        IpAddr::V6(v6) => EndpointIpamConfig {
            ipv6_address: Some(v6.to_string()),
            ..Default::default()
        },
    };

    EndpointSettings {
        ipam_config: Some(ipam_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerLauncher for DockerLauncher {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn launch(&self, spec: LaunchSpec) -> Result<ContainerHandle> {
        let container_name = Self::container_name(&spec.id);

        self.pull_image(&spec.image).await;

        let host_config = HostConfig {
            network_mode: Some(self.network.clone()),
            ..Default::default()
        };

        let networking_config = NetworkingConfig {
            endpoints_config: HashMap::from([(
                self.network.clone(),
                endpoint_settings(spec.address),
            )]),
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(container_env(&spec.env)),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            tty: Some(false),
            host_config: Some(host_config),
            networking_config: Some(networking_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        info!(container = %container_name, address = %spec.address, "Creating container");
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::LaunchFailed(format!("Failed to create container: {}", e)))?;

        info!(container = %container_name, "Starting container");
        if let Err(e) = self
            .docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
        {
            // The container exists but never ran; don't leave it holding the address.
            let _ = self
                .docker
                .remove_container(
                    &container_name,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(Error::LaunchFailed(format!(
                "Failed to start container: {}",
                e
            )));
        }

        Ok(ContainerHandle {
            id: spec.id,
            container_id: container.id,
            launcher_name: self.name().to_string(),
        })
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<()> {
        let container_name = Self::container_name(&handle.id);

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(&container_name, Some(options))
            .await
            .map_err(|e| Error::Internal(format!("Failed to remove container: {}", e)))?;

        info!(container = %container_name, "Removed container");
        Ok(())
    }
}
