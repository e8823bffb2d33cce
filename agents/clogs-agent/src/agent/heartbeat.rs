//! Heartbeat Service
//!
//! Tells the backend the agent is alive, once per interval. Failed beats are
//! logged and the loop carries on.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::agent::schedule::run_gated;
use crate::backend::client::BackendClient;

pub struct HeartbeatService<B: BackendClient> {
    backend: Arc<B>,
    agent_id: String,
}

impl<B: BackendClient> HeartbeatService<B> {
    pub fn new(backend: Arc<B>, agent_id: &str) -> Self {
        Self {
            backend,
            agent_id: agent_id.to_string(),
        }
    }

    /// Send one heartbeat. Returns whether the backend accepted it.
    pub async fn beat(&self) -> bool {
        match self.backend.send_heartbeat(&self.agent_id).await {
            Ok(()) => {
                debug!(agent_id = %self.agent_id, "Heartbeat sent");
                true
            }
            Err(e) => {
                warn!(agent_id = %self.agent_id, error = %e, "Heartbeat failed");
                false
            }
        }
    }

    pub async fn run(&self, interval: Duration, running: Arc<AtomicBool>) {
        let service = self;
        run_gated("heartbeat", interval, running, move || async move {
            service.beat().await;
        })
        .await;
    }
}
