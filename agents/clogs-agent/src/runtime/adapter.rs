//! Runtime Adapter Trait
//!
//! Defines the interface the agent consumes from a container runtime:
//! listing containers, refreshing one container, and following its logs.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A following stream of raw log chunks, each holding one or more lines.
pub type LogLines = BoxStream<'static, Result<String>>;

/// Container information returned by the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    /// Repository tags of the container's image, primary tag first
    pub image_tags: Vec<String>,
    pub status: ContainerStatus,
    /// Creation time as reported by the runtime (RFC 3339 for Docker)
    pub created_at: String,
    pub ports: Vec<PortBinding>,
    pub labels: HashMap<String, String>,
}

impl ContainerInfo {
    /// First image tag, if the image carries any
    pub fn primary_image_tag(&self) -> Option<&str> {
        self.image_tags.first().map(String::as_str)
    }
}

/// Container status
///
/// Unrecognized runtime states map to `Custom` instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Removing,
    Dead,
    #[serde(other)]
    Custom,
}

impl ContainerStatus {
    /// Map a runtime state string onto the closed status set
    pub fn from_runtime(state: &str) -> Self {
        match state {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "exited" => ContainerStatus::Exited,
            "removing" => ContainerStatus::Removing,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Custom,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port binding configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub host_ip: Option<String>,
    pub protocol: String,
}

/// Runtime adapter trait - what the agent needs from a container runtime
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Get the runtime type name
    fn runtime_type(&self) -> &str;

    /// Check if the runtime is available and healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get runtime version information
    async fn version(&self) -> Result<String>;

    /// List containers with their current attributes
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>>;

    /// Re-read one container's live attributes. `Ok(None)` means it no longer exists.
    async fn get_container(&self, id_or_name: &str) -> Result<Option<ContainerInfo>>;

    /// Open a following, timestamped log stream starting from now
    async fn stream_logs(&self, id: &str) -> Result<LogLines>;
}

/// Confirm the runtime answers before services start, returning its version
pub async fn ensure_available<R: RuntimeAdapter + ?Sized>(runtime: &R) -> Result<String> {
    if !runtime.health_check().await? {
        bail!("{} runtime is not reachable", runtime.runtime_type());
    }
    runtime.version().await
}
