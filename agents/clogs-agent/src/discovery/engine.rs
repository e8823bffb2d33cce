//! Discovery / Reconciliation Engine
//!
//! Each cycle snapshots the runtime, classifies and filters containers,
//! reconciles the result against what the backend was told before, and
//! publishes the monitored set to the log pipeline.

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::agent::schedule::run_gated;
use crate::backend::client::{BackendClient, BackendError};
use crate::backend::model::{ContainerRegistration, ContextRegistration};
use crate::discovery::context::{classify, Containment, ContextKey};
use crate::discovery::filter::TagFilter;
use crate::discovery::monitored::{MonitoredContainer, MonitoredSetSink};
use crate::discovery::registry::{ContainerRegistry, ContextRegistry, RegisteredContainer};
use crate::runtime::adapter::RuntimeAdapter;

/// Image name reported when a container's image has no tag
const UNKNOWN_IMAGE: &str = "unknown";

/// Monitored containers grouped by context, in a stable order
pub type ContextGroups = BTreeMap<ContextKey, Vec<MonitoredContainer>>;

/// What one cycle did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub monitored: usize,
    pub contexts_registered: usize,
    pub containers_registered: usize,
    pub status_updates: usize,
    pub deleted: usize,
    /// Groups whose context could not be registered this cycle
    pub skipped_groups: usize,
}

/// Parse a runtime creation time (`YYYY-MM-DDTHH:MM:SS...`, UTC) into unix seconds.
///
/// Only the first 19 characters are considered.
pub fn parse_created(created: &str) -> Option<i64> {
    let prefix = created.get(..19)?;
    NaiveDateTime::parse_from_str(prefix, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// One read-only pass: list, refresh, filter, classify and apply containment.
///
/// A container that vanishes between listing and refresh is left out; any
/// other refresh failure fails the whole scan so no partial view escapes.
pub async fn scan<R: RuntimeAdapter + ?Sized>(
    runtime: &R,
    filter: &TagFilter,
    containment: &Containment,
) -> Result<ContextGroups> {
    let listed = runtime
        .list_containers(true)
        .await
        .context("Failed to list containers")?;

    let mut refreshed = Vec::with_capacity(listed.len());
    for container in listed {
        let info = runtime
            .get_container(&container.id)
            .await
            .with_context(|| format!("Failed to refresh container {}", container.id))?;
        match info {
            Some(info) => refreshed.push(info),
            None => debug!(container_id = %container.id, "Container vanished during scan"),
        }
    }

    let mut groups = ContextGroups::new();
    for info in filter.apply(refreshed) {
        let key = classify(&info.labels);
        if !containment.admits(&key) {
            continue;
        }
        let container = MonitoredContainer::new(info, &key);
        groups.entry(key).or_default().push(container);
    }

    Ok(groups)
}

/// Reconciles runtime containers with their backend registrations
pub struct DiscoveryService<R: RuntimeAdapter, B: BackendClient> {
    runtime: Arc<R>,
    backend: Arc<B>,
    agent_id: String,
    filter: TagFilter,
    containment: Containment,
    contexts: ContextRegistry,
    containers: ContainerRegistry,
    sink: Arc<dyn MonitoredSetSink>,
}

impl<R: RuntimeAdapter, B: BackendClient> DiscoveryService<R, B> {
    pub fn new(
        runtime: Arc<R>,
        backend: Arc<B>,
        agent_id: &str,
        filter: TagFilter,
        containment: Containment,
        sink: Arc<dyn MonitoredSetSink>,
    ) -> Self {
        Self {
            runtime,
            backend,
            agent_id: agent_id.to_string(),
            filter,
            containment,
            contexts: ContextRegistry::new(),
            containers: ContainerRegistry::new(),
            sink,
        }
    }

    pub fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    pub fn containers(&self) -> &ContainerRegistry {
        &self.containers
    }

    /// Load existing registrations from the backend. Failures leave the
    /// registries as they are.
    pub async fn seed_from_backend(&self) {
        match self.backend.list_contexts(&self.agent_id).await {
            Ok(contexts) => {
                for record in contexts {
                    let key = ContextKey::new(record.context, Some(record.name));
                    self.contexts.insert(key, record.id);
                }
            }
            Err(e) => warn!(error = %e, "Failed to load registered contexts"),
        }

        match self.backend.list_containers(&self.agent_id).await {
            Ok(containers) => {
                for record in containers {
                    self.containers.insert(
                        record.id,
                        RegisteredContainer {
                            status: record.status,
                            context_id: record.context,
                        },
                    );
                }
            }
            Err(e) => warn!(error = %e, "Failed to load registered containers"),
        }

        info!(
            contexts = self.contexts.len(),
            containers = self.containers.len(),
            "Registries seeded from backend"
        );
    }

    /// Run one discovery cycle
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let groups = scan(self.runtime.as_ref(), &self.filter, &self.containment).await?;

        let mut report = CycleReport::default();
        let scanned: HashSet<String> = groups.values().flatten().map(|c| c.id.clone()).collect();
        let mut monitored = Vec::with_capacity(scanned.len());

        for (key, containers) in groups {
            let context_id = if key.is_orphan() {
                None
            } else {
                match self.resolve_context(&key, &mut report).await {
                    Some(id) => Some(id),
                    None => {
                        error!(context = %key, "Context not registered, skipping its containers this cycle");
                        report.skipped_groups += 1;
                        monitored.extend(containers);
                        continue;
                    }
                }
            };

            for container in containers {
                self.reconcile_container(&container, context_id.as_deref(), &mut report)
                    .await;
                monitored.push(container);
            }
        }

        for id in self.containers.absent_from(&scanned) {
            info!(container_id = %id, "Container gone, deleting from backend");
            if let Err(e) = self.backend.delete_container(&self.agent_id, &id).await {
                warn!(container_id = %id, error = %e, "Failed to delete container from backend");
            }
            self.containers.remove(&id);
            report.deleted += 1;
        }

        report.monitored = monitored.len();
        self.sink.publish(monitored);
        Ok(report)
    }

    /// Remote id of a grouping, registering it on first sight
    async fn resolve_context(&self, key: &ContextKey, report: &mut CycleReport) -> Option<String> {
        if let Some(id) = self.contexts.get(key) {
            return Some(id);
        }

        let registration = ContextRegistration {
            agent_id: self.agent_id.clone(),
            name: key.group.clone().unwrap_or_default(),
            context: key.context,
        };

        match self.backend.register_context(&self.agent_id, &registration).await {
            Ok(id) => {
                info!(context = %key, context_id = %id, "Context registered");
                self.contexts.insert(key.clone(), id.clone());
                report.contexts_registered += 1;
                Some(id)
            }
            Err(e) => {
                warn!(context = %key, error = %e, "Failed to register context");
                None
            }
        }
    }

    async fn reconcile_container(
        &self,
        container: &MonitoredContainer,
        context_id: Option<&str>,
        report: &mut CycleReport,
    ) {
        if !self.containers.contains(&container.id) {
            self.register_container(container, context_id, report).await;
        }

        let Some(entry) = self.containers.get(&container.id) else {
            return;
        };
        if entry.status == Some(container.status) {
            return;
        }

        let since = Utc::now().timestamp();
        match self
            .backend
            .update_container_status(&self.agent_id, &container.id, container.status, since)
            .await
        {
            Ok(()) => debug!(
                container_id = %container.short_id(),
                status = %container.status,
                "Container status updated"
            ),
            Err(e) => warn!(
                container_id = %container.short_id(),
                status = %container.status,
                error = %e,
                "Failed to update container status"
            ),
        }
        report.status_updates += 1;
        self.containers.set_status(&container.id, container.status);
    }

    async fn register_container(
        &self,
        container: &MonitoredContainer,
        context_id: Option<&str>,
        report: &mut CycleReport,
    ) {
        let created_at = parse_created(&container.created_at).unwrap_or_else(|| {
            warn!(
                container_id = %container.short_id(),
                created = %container.created_at,
                "Unparseable creation time, using now"
            );
            Utc::now().timestamp()
        });

        let registration = ContainerRegistration {
            id: container.id.clone(),
            agent_id: self.agent_id.clone(),
            context: context_id.map(str::to_string),
            name: container.name.clone(),
            image: container
                .image
                .clone()
                .unwrap_or_else(|| UNKNOWN_IMAGE.to_string()),
            created_at,
        };

        match self.backend.register_container(&self.agent_id, &registration).await {
            Ok(_) => {}
            Err(BackendError::Conflict) => {
                debug!(container_id = %container.short_id(), "Container already registered");
            }
            Err(e) => {
                warn!(container_id = %container.short_id(), error = %e, "Failed to register container");
                return;
            }
        }

        info!(
            container_id = %container.short_id(),
            name = %container.name,
            context = %container.key(),
            "Container registered"
        );
        self.containers.insert(
            container.id.clone(),
            RegisteredContainer {
                status: Some(container.status),
                context_id: context_id.map(str::to_string),
            },
        );
        report.containers_registered += 1;
    }

    /// Run cycles every `interval` until `running` is cleared
    pub async fn run(&self, interval: Duration, running: Arc<AtomicBool>) {
        if self.containment.is_cross_boundary() {
            warn!("Monitoring across all groupings");
        }

        let service = self;
        run_gated("discovery", interval, running, move || async move {
            match service.run_cycle().await {
                Ok(report) => debug!(?report, "Discovery cycle finished"),
                Err(e) => error!(error = %format!("{:#}", e), "Discovery cycle failed"),
            }
        })
        .await;
    }
}
