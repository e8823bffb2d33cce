//! Log Collection Pipeline
//!
//! `LogCollector` keeps one streaming task per monitored container, driven
//! by set differences against each published monitored set. All tasks feed
//! a bounded queue drained by a single `LogSender`, which batches records
//! and uploads them with retry and a lossy retention ceiling.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::client::BackendClient;
use crate::cli::config::LogsConfig;
use crate::discovery::monitored::{MonitoredContainer, MonitoredSetSink};
use crate::logs::batch::{Batch, BatchLimits};
use crate::logs::record::LogRecord;
use crate::logs::stream::follow_container;
use crate::runtime::adapter::{ContainerStatus, RuntimeAdapter};

/// Pipeline tuning
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub limits: BatchLimits,
    /// Pause after a failed upload before trying again
    pub retry_delay: Duration,
    /// Longest the sender waits on an empty queue
    pub receive_timeout: Duration,
    pub queue_capacity: usize,
}

impl From<&LogsConfig> for PipelineSettings {
    fn from(config: &LogsConfig) -> Self {
        Self {
            limits: BatchLimits {
                max_batch: config.batch_size,
                flush_interval: Duration::from_millis(config.flush_interval_ms),
                max_buffered: config.max_buffered,
            },
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            receive_timeout: Duration::from_millis(config.receive_timeout_ms),
            queue_capacity: config.queue_capacity,
        }
    }
}

/// A running streaming task and its cancellation handle
struct StreamingTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Tasks started and stopped by one monitored-set update
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskChanges {
    pub started: usize,
    pub stopped: usize,
}

/// Owns the per-container streaming tasks and the sender loop
pub struct LogCollector<R: RuntimeAdapter + 'static> {
    runtime: Arc<R>,
    tasks: Mutex<HashMap<String, StreamingTask>>,
    queue: mpsc::Sender<LogRecord>,
    running: Arc<AtomicBool>,
    sender: Mutex<Option<JoinHandle<()>>>,
}

impl<R: RuntimeAdapter + 'static> LogCollector<R> {
    /// Create the pipeline and spawn its sender loop
    pub fn start<B: BackendClient + 'static>(
        runtime: Arc<R>,
        backend: Arc<B>,
        agent_id: &str,
        settings: PipelineSettings,
    ) -> Arc<Self> {
        let (queue, receiver) = mpsc::channel(settings.queue_capacity);
        let running = Arc::new(AtomicBool::new(true));

        let sender = LogSender::new(backend, agent_id, settings);
        let handle = tokio::spawn(sender.run(receiver, running.clone()));
        info!(
            batch_size = settings.limits.max_batch,
            max_buffered = settings.limits.max_buffered,
            "Log pipeline started"
        );

        Arc::new(Self {
            runtime,
            tasks: Mutex::new(HashMap::new()),
            queue,
            running,
            sender: Mutex::new(Some(handle)),
        })
    }

    /// Reconcile streaming tasks against a complete monitored set.
    ///
    /// Containers missing from the set have their task cancelled; new ones
    /// get a task. A task whose stream ended is replaced only when its
    /// container is running again.
    pub fn update_monitored(&self, containers: &[MonitoredContainer]) -> TaskChanges {
        let mut changes = TaskChanges::default();
        let mut tasks = self.tasks.lock();
        if !self.running.load(Ordering::SeqCst) {
            return changes;
        }

        let wanted: HashSet<&str> = containers.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<String> = tasks
            .keys()
            .filter(|id| !wanted.contains(id.as_str()))
            .cloned()
            .collect();

        for id in stale {
            if let Some(task) = tasks.remove(&id) {
                info!(container_id = %id, "Stopping log collection");
                task.cancel.cancel();
                changes.stopped += 1;
            }
        }

        for container in containers {
            if let Some(task) = tasks.get(&container.id) {
                let restarted = task.handle.is_finished() && container.status == ContainerStatus::Running;
                if !restarted {
                    continue;
                }
                debug!(container_id = %container.id, "Log stream ended earlier, reopening");
            }

            info!(
                container_id = %container.short_id(),
                name = %container.name,
                "Starting log collection"
            );
            let task = self.spawn_task(&container.id);
            tasks.insert(container.id.clone(), task);
            changes.started += 1;
        }

        changes
    }

    fn spawn_task(&self, container_id: &str) -> StreamingTask {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(follow_container(
            self.runtime.clone(),
            container_id.to_string(),
            self.queue.clone(),
            cancel.clone(),
        ));
        StreamingTask { cancel, handle }
    }

    /// Number of containers with a streaming task
    pub fn active_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Stop every streaming task and wait for the sender to exit.
    ///
    /// Records still buffered are discarded.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        {
            let mut tasks = self.tasks.lock();
            for (_, task) in tasks.drain() {
                task.cancel.cancel();
            }
        }

        let sender = self.sender.lock().take();
        if let Some(handle) = sender {
            if let Err(e) = handle.await {
                warn!(error = %e, "Log sender task failed");
            }
        }
        info!("Log pipeline stopped");
    }
}

impl<R: RuntimeAdapter + 'static> MonitoredSetSink for LogCollector<R> {
    fn publish(&self, containers: Vec<MonitoredContainer>) {
        let changes = self.update_monitored(&containers);
        if changes.started > 0 || changes.stopped > 0 {
            debug!(
                started = changes.started,
                stopped = changes.stopped,
                active = self.active_tasks(),
                "Streaming tasks updated"
            );
        }
    }
}

/// Drains the log queue into batches and uploads them
pub struct LogSender<B: BackendClient> {
    backend: Arc<B>,
    agent_id: String,
    settings: PipelineSettings,
}

impl<B: BackendClient> LogSender<B> {
    pub fn new(backend: Arc<B>, agent_id: &str, settings: PipelineSettings) -> Self {
        Self {
            backend,
            agent_id: agent_id.to_string(),
            settings,
        }
    }

    /// Run until `running` is cleared or the queue closes
    pub async fn run(self, mut receiver: mpsc::Receiver<LogRecord>, running: Arc<AtomicBool>) {
        let limits = self.settings.limits;
        let mut batch = Batch::new(limits, Instant::now());

        while running.load(Ordering::SeqCst) {
            match tokio::time::timeout(self.settings.receive_timeout, receiver.recv()).await {
                Ok(Some(record)) => batch.push(record),
                Ok(None) => {
                    debug!("Log queue closed");
                    break;
                }
                Err(_) => {}
            }

            // Take what is already queued, never filling past one batch
            while batch.len() < limits.max_batch {
                match receiver.try_recv() {
                    Ok(record) => batch.push(record),
                    Err(_) => break,
                }
            }
            self.drop_excess(&mut batch);

            if !batch.should_flush(Instant::now()) {
                continue;
            }

            let upload = batch.to_upload(&self.agent_id);
            match self.backend.upload_logs(&self.agent_id, &upload).await {
                Ok(()) => {
                    debug!(records = upload.len(), "Logs sent");
                    batch.flushed(Instant::now());
                }
                Err(e) => {
                    warn!(error = %e, buffered = batch.len(), "Failed to send logs, keeping batch");
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }

        if !batch.is_empty() {
            debug!(discarded = batch.len(), "Discarding unsent logs");
        }
        info!("Log sender stopped");
    }

    fn drop_excess(&self, batch: &mut Batch) {
        let dropped = batch.enforce_ceiling();
        if dropped > 0 {
            warn!(
                dropped,
                max_buffered = self.settings.limits.max_buffered,
                "Log buffer full, dropped oldest records"
            );
        }
    }
}
