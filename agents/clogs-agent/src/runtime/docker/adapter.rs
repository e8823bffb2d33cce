//! Docker Adapter
//!
//! Implementation of RuntimeAdapter for Docker using the bollard library.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions, LogsOptions};
use bollard::service::{ContainerInspectResponse, ContainerStateStatusEnum};
use bollard::Docker;
use chrono::DateTime;
use futures_util::StreamExt;
use tracing::debug;

use crate::runtime::adapter::{ContainerInfo, ContainerStatus, LogLines, PortBinding, RuntimeAdapter};

/// Docker runtime adapter
pub struct DockerAdapter {
    client: Docker,
    socket_path: String,
}

impl DockerAdapter {
    /// Create a new Docker adapter connecting to the default socket
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_socket_defaults()
            .context("Failed to connect to Docker socket")?;

        Ok(Self {
            client,
            socket_path: "/var/run/docker.sock".to_string(),
        })
    }

    /// Create a new Docker adapter with a custom socket path
    pub fn with_socket(socket_path: &str) -> Result<Self> {
        let client = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
            .context("Failed to connect to Docker socket")?;

        Ok(Self {
            client,
            socket_path: socket_path.to_string(),
        })
    }

    /// Path of the socket this adapter talks to
    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    fn parse_state(state: Option<&ContainerStateStatusEnum>) -> ContainerStatus {
        let state = match state {
            Some(ContainerStateStatusEnum::CREATED) => "created",
            Some(ContainerStateStatusEnum::RUNNING) => "running",
            Some(ContainerStateStatusEnum::PAUSED) => "paused",
            Some(ContainerStateStatusEnum::RESTARTING) => "restarting",
            Some(ContainerStateStatusEnum::REMOVING) => "removing",
            Some(ContainerStateStatusEnum::EXITED) => "exited",
            Some(ContainerStateStatusEnum::DEAD) => "dead",
            _ => "",
        };
        ContainerStatus::from_runtime(state)
    }

    fn inspect_ports(container: &ContainerInspectResponse) -> Vec<PortBinding> {
        container
            .network_settings
            .as_ref()
            .and_then(|ns| ns.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .filter_map(|(key, bindings)| {
                        let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
                        let container_port = port.parse().ok()?;

                        let (host_port, host_ip) = bindings
                            .as_ref()
                            .and_then(|b| b.first())
                            .map(|b| {
                                (
                                    b.host_port.as_ref().and_then(|p| p.parse().ok()),
                                    b.host_ip.clone(),
                                )
                            })
                            .unwrap_or((None, None));

                        Some(PortBinding {
                            container_port,
                            host_port,
                            host_ip,
                            protocol: protocol.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Repository tags of an image; empty when the image is untagged or gone
    async fn image_tags(&self, image_id: &str) -> Vec<String> {
        match self.client.inspect_image(image_id).await {
            Ok(image) => image.repo_tags.unwrap_or_default(),
            Err(e) => {
                debug!(image = %image_id, error = %e, "Failed to inspect image");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl RuntimeAdapter for DockerAdapter {
    fn runtime_type(&self) -> &str {
        "docker"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!(error = %e, "Docker health check failed");
                Ok(false)
            }
        }
    }

    async fn version(&self) -> Result<String> {
        let version = self.client.version().await?;
        Ok(format!(
            "Docker {} (API {})",
            version.version.unwrap_or_default(),
            version.api_version.unwrap_or_default()
        ))
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")?;

        let mut result = Vec::with_capacity(containers.len());
        for container in containers {
            let ports = container
                .ports
                .unwrap_or_default()
                .iter()
                .map(|p| PortBinding {
                    container_port: p.private_port,
                    host_port: p.public_port,
                    host_ip: p.ip.clone(),
                    protocol: p.typ.as_ref().map(|t| t.to_string()).unwrap_or_else(|| "tcp".to_string()),
                })
                .collect();

            result.push(ContainerInfo {
                id: container.id.unwrap_or_default(),
                name: container
                    .names
                    .and_then(|n| n.first().cloned())
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string(),
                image_tags: container.image.into_iter().collect(),
                status: ContainerStatus::from_runtime(container.state.as_deref().unwrap_or_default()),
                created_at: container
                    .created
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default(),
                ports,
                labels: container.labels.unwrap_or_default(),
            });
        }

        Ok(result)
    }

    async fn get_container(&self, id_or_name: &str) -> Result<Option<ContainerInfo>> {
        let container = match self
            .client
            .inspect_container(id_or_name, None::<InspectContainerOptions>)
            .await
        {
            Ok(container) => container,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let config = container.config.as_ref();
        let mut image_tags = match container.image.as_deref() {
            Some(image_id) => self.image_tags(image_id).await,
            None => Vec::new(),
        };
        if image_tags.is_empty() {
            // Fall back to the reference the container was created from
            image_tags.extend(config.and_then(|c| c.image.clone()));
        }

        Ok(Some(ContainerInfo {
            id: container.id.clone().unwrap_or_default(),
            name: container
                .name
                .clone()
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image_tags,
            status: Self::parse_state(container.state.as_ref().and_then(|s| s.status.as_ref())),
            created_at: container.created.clone().unwrap_or_default(),
            ports: Self::inspect_ports(&container),
            labels: config.and_then(|c| c.labels.clone()).unwrap_or_default(),
        }))
    }

    async fn stream_logs(&self, id: &str) -> Result<LogLines> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: "0".to_string(),
            ..Default::default()
        };

        let stream = self
            .client
            .logs(id, Some(options))
            .map(|chunk| chunk.map(|output| output.to_string()).map_err(anyhow::Error::from));

        Ok(stream.boxed())
    }
}
