//! In-memory runtime and backend used by unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

use crate::backend::client::{BackendClient, BackendError, BackendResult};
use crate::backend::model::{
    AgentRecord, AgentRegistration, ContainerRecord, ContainerRegistration, ContextRecord,
    ContextRegistration,
};
use crate::discovery::monitored::{MonitoredContainer, MonitoredSetSink};
use crate::logs::record::LogUpload;
use crate::runtime::adapter::{ContainerInfo, ContainerStatus, LogLines, RuntimeAdapter};

/// A running container created at 2024-05-01T10:00:00Z
pub fn container(id: &str, name: &str, labels: &[(&str, &str)]) -> ContainerInfo {
    ContainerInfo {
        id: id.to_string(),
        name: name.to_string(),
        image_tags: vec!["app:latest".to_string()],
        status: ContainerStatus::Running,
        created_at: "2024-05-01T10:00:00.000000000Z".to_string(),
        ports: Vec::new(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

#[derive(Default)]
struct RuntimeState {
    containers: Vec<ContainerInfo>,
    unhealthy: bool,
    fail_list: bool,
    fail_inspect: bool,
    feeds: HashMap<String, mpsc::UnboundedReceiver<Result<String>>>,
    opens: HashMap<String, usize>,
}

/// Container runtime backed by a vector
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, info: ContainerInfo) {
        let mut state = self.state.lock();
        state.containers.retain(|c| c.id != info.id);
        state.containers.push(info);
    }

    pub fn remove(&self, id: &str) {
        self.state.lock().containers.retain(|c| c.id != id);
    }

    pub fn set_status(&self, id: &str, status: ContainerStatus) {
        if let Some(c) = self.state.lock().containers.iter_mut().find(|c| c.id == id) {
            c.status = status;
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().unhealthy = !healthy;
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.lock().fail_list = fail;
    }

    pub fn fail_inspect(&self, fail: bool) {
        self.state.lock().fail_inspect = fail;
    }

    /// Feed for the next log stream opened on `id`. Dropping it ends the stream.
    pub fn log_feed(&self, id: &str) -> mpsc::UnboundedSender<Result<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().feeds.insert(id.to_string(), rx);
        tx
    }

    /// How many times a log stream was opened for `id`
    pub fn stream_opens(&self, id: &str) -> usize {
        self.state.lock().opens.get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RuntimeAdapter for FakeRuntime {
    fn runtime_type(&self) -> &str {
        "fake"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.state.lock().unhealthy)
    }

    async fn version(&self) -> Result<String> {
        Ok("0.0.0".to_string())
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        let state = self.state.lock();
        if state.fail_list {
            return Err(anyhow!("list failed"));
        }
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.status == ContainerStatus::Running)
            .cloned()
            .collect())
    }

    async fn get_container(&self, id_or_name: &str) -> Result<Option<ContainerInfo>> {
        let state = self.state.lock();
        if state.fail_inspect {
            return Err(anyhow!("inspect failed"));
        }
        Ok(state
            .containers
            .iter()
            .find(|c| c.id == id_or_name || c.name == id_or_name)
            .cloned())
    }

    async fn stream_logs(&self, id: &str) -> Result<LogLines> {
        let mut state = self.state.lock();
        *state.opens.entry(id.to_string()).or_insert(0) += 1;
        match state.feeds.remove(id) {
            Some(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}

#[derive(Default)]
struct BackendState {
    next_id: u64,
    agents: HashSet<String>,
    agent_registrations: usize,
    transient_agent_failures: usize,
    seeded_contexts: Vec<ContextRecord>,
    seeded_containers: Vec<ContainerRecord>,
    contexts: Vec<ContextRegistration>,
    containers: Vec<ContainerRegistration>,
    existing_containers: HashSet<String>,
    status_updates: Vec<(String, ContainerStatus, i64)>,
    status_update_calls: usize,
    deletes: Vec<String>,
    heartbeats: usize,
    upload_attempts: Vec<usize>,
    uploads: Vec<LogUpload>,
    fail_contexts: bool,
    fail_container_registrations: bool,
    fail_status_updates: bool,
    fail_deletes: bool,
    fail_heartbeats: bool,
    fail_uploads: bool,
}

impl BackendState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

fn unavailable() -> BackendError {
    BackendError::Status {
        status: 503,
        body: "unavailable".to_string(),
    }
}

/// Backend that records every call
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_agent(&self, id: &str) {
        self.state.lock().agents.insert(id.to_string());
    }

    /// Fail the next `count` agent lookups or registrations with a 503
    pub fn fail_agent_calls(&self, count: usize) {
        self.state.lock().transient_agent_failures = count;
    }

    pub fn agent_registrations(&self) -> usize {
        self.state.lock().agent_registrations
    }

    pub fn seed(&self, contexts: Vec<ContextRecord>, containers: Vec<ContainerRecord>) {
        let mut state = self.state.lock();
        state.seeded_contexts = contexts;
        state.seeded_containers = containers;
    }

    /// Make registration of `id` answer with a conflict
    pub fn mark_existing_container(&self, id: &str) {
        self.state.lock().existing_containers.insert(id.to_string());
    }

    pub fn fail_context_registrations(&self, fail: bool) {
        self.state.lock().fail_contexts = fail;
    }

    pub fn fail_container_registrations(&self, fail: bool) {
        self.state.lock().fail_container_registrations = fail;
    }

    pub fn fail_status_updates(&self, fail: bool) {
        self.state.lock().fail_status_updates = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().fail_deletes = fail;
    }

    pub fn fail_heartbeats(&self, fail: bool) {
        self.state.lock().fail_heartbeats = fail;
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.state.lock().fail_uploads = fail;
    }

    pub fn context_registrations(&self) -> Vec<ContextRegistration> {
        self.state.lock().contexts.clone()
    }

    pub fn container_registrations(&self) -> Vec<ContainerRegistration> {
        self.state.lock().containers.clone()
    }

    /// Successful status pushes
    pub fn status_updates(&self) -> Vec<(String, ContainerStatus, i64)> {
        self.state.lock().status_updates.clone()
    }

    /// Every status push, failed or not
    pub fn status_update_calls(&self) -> usize {
        self.state.lock().status_update_calls
    }

    pub fn delete_calls(&self) -> Vec<String> {
        self.state.lock().deletes.clone()
    }

    pub fn heartbeats(&self) -> usize {
        self.state.lock().heartbeats
    }

    /// Record counts of every upload attempt
    pub fn upload_attempts(&self) -> Vec<usize> {
        self.state.lock().upload_attempts.clone()
    }

    /// Messages of successful uploads, in upload order
    pub fn uploaded_messages(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut messages = Vec::new();
        for upload in &state.uploads {
            match upload {
                LogUpload::Single(record) => messages.push(record.message.clone()),
                LogUpload::Container(logs) => {
                    messages.extend(logs.logs.iter().map(|r| r.message.clone()))
                }
                LogUpload::MultiContainer(logs) => messages.extend(
                    logs.container_logs
                        .iter()
                        .flat_map(|c| c.logs.iter().map(|r| r.message.clone())),
                ),
            }
        }
        messages
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    async fn register_agent(&self, _agent: &AgentRegistration) -> BackendResult<String> {
        let mut state = self.state.lock();
        if state.transient_agent_failures > 0 {
            state.transient_agent_failures -= 1;
            return Err(unavailable());
        }
        let id = state.next_id("agent");
        state.agents.insert(id.clone());
        state.agent_registrations += 1;
        Ok(id)
    }

    async fn get_agent(&self, agent_id: &str) -> BackendResult<AgentRecord> {
        let mut state = self.state.lock();
        if state.transient_agent_failures > 0 {
            state.transient_agent_failures -= 1;
            return Err(unavailable());
        }
        if state.agents.contains(agent_id) {
            Ok(AgentRecord {
                id: agent_id.to_string(),
                hostname: None,
            })
        } else {
            Err(BackendError::NotFound)
        }
    }

    async fn delete_agent(&self, agent_id: &str) -> BackendResult<()> {
        self.state.lock().agents.remove(agent_id);
        Ok(())
    }

    async fn send_heartbeat(&self, _agent_id: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.heartbeats += 1;
        if state.fail_heartbeats {
            return Err(unavailable());
        }
        Ok(())
    }

    async fn list_contexts(&self, _agent_id: &str) -> BackendResult<Vec<ContextRecord>> {
        Ok(self.state.lock().seeded_contexts.clone())
    }

    async fn register_context(
        &self,
        _agent_id: &str,
        context: &ContextRegistration,
    ) -> BackendResult<String> {
        let mut state = self.state.lock();
        if state.fail_contexts {
            return Err(unavailable());
        }
        state.contexts.push(context.clone());
        Ok(state.next_id("ctx"))
    }

    async fn delete_context(&self, _agent_id: &str, _context_id: &str) -> BackendResult<()> {
        Ok(())
    }

    async fn list_containers(&self, _agent_id: &str) -> BackendResult<Vec<ContainerRecord>> {
        Ok(self.state.lock().seeded_containers.clone())
    }

    async fn register_container(
        &self,
        _agent_id: &str,
        container: &ContainerRegistration,
    ) -> BackendResult<String> {
        let mut state = self.state.lock();
        if state.fail_container_registrations {
            return Err(unavailable());
        }
        if state.existing_containers.contains(&container.id) {
            return Err(BackendError::Conflict);
        }
        state.containers.push(container.clone());
        Ok(container.id.clone())
    }

    async fn delete_container(&self, _agent_id: &str, container_id: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.deletes.push(container_id.to_string());
        if state.fail_deletes {
            return Err(unavailable());
        }
        Ok(())
    }

    async fn update_container_status(
        &self,
        _agent_id: &str,
        container_id: &str,
        status: ContainerStatus,
        since: i64,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.status_update_calls += 1;
        if state.fail_status_updates {
            return Err(unavailable());
        }
        state
            .status_updates
            .push((container_id.to_string(), status, since));
        Ok(())
    }

    async fn upload_logs(&self, _agent_id: &str, upload: &LogUpload) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.upload_attempts.push(upload.len());
        if state.fail_uploads {
            return Err(unavailable());
        }
        state.uploads.push(upload.clone());
        Ok(())
    }
}

/// Sink that keeps every published set
#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<Vec<MonitoredContainer>>>,
}

impl RecordingSink {
    pub fn last(&self) -> Vec<MonitoredContainer> {
        self.published.lock().last().cloned().unwrap_or_default()
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }
}

impl MonitoredSetSink for RecordingSink {
    fn publish(&self, containers: Vec<MonitoredContainer>) {
        self.published.lock().push(containers);
    }
}
