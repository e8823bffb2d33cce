//! Monitored containers and the handoff of the monitored set.

use std::collections::HashMap;

use crate::discovery::context::{ContextKey, ExecutionContext};
use crate::runtime::adapter::{ContainerInfo, ContainerStatus, PortBinding};

/// Per-cycle snapshot of a container that passed classification, filtering
/// and containment. Re-derived every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredContainer {
    pub id: String,
    pub name: String,
    /// Primary image tag
    pub image: Option<String>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub status: ContainerStatus,
    pub created_at: String,
    pub context: ExecutionContext,
    pub group: Option<String>,
}

impl MonitoredContainer {
    pub fn new(info: ContainerInfo, key: &ContextKey) -> Self {
        let image = info.primary_image_tag().map(str::to_string);
        Self {
            id: info.id,
            name: info.name,
            image,
            labels: info.labels,
            ports: info.ports,
            status: info.status,
            created_at: info.created_at,
            context: key.context,
            group: key.group.clone(),
        }
    }

    pub fn key(&self) -> ContextKey {
        ContextKey::new(self.context, self.group.clone())
    }

    /// First twelve characters of the id, as Docker prints it
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

/// Receiver of each cycle's complete monitored set.
///
/// Every publish replaces the previous set.
pub trait MonitoredSetSink: Send + Sync {
    fn publish(&self, containers: Vec<MonitoredContainer>);
}
