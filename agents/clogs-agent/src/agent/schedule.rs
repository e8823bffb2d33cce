//! Service Scheduling
//!
//! Fixed-interval loops gated on elapsed time. A tick that overruns its
//! interval delays the next one instead of overlapping it, and the running
//! flag is polled at a sub-second granularity so shutdown stays responsive.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How often an idle loop re-checks its gate and running flag
pub const POLL_GRANULARITY: Duration = Duration::from_millis(250);

/// Elapsed-time gate. A fresh gate is due immediately.
#[derive(Debug, Clone)]
pub struct IntervalGate {
    interval: Duration,
    last_run: Option<Instant>,
}

impl IntervalGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_run {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Record that a tick finished at `now`
    pub fn mark(&mut self, now: Instant) {
        self.last_run = Some(now);
    }
}

/// Run `tick` every `interval` until `running` is cleared.
pub async fn run_gated<F, Fut>(name: &str, interval: Duration, running: Arc<AtomicBool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    info!(service = name, interval_ms = interval.as_millis() as u64, "Service loop started");
    let mut gate = IntervalGate::new(interval);

    while running.load(Ordering::SeqCst) {
        if !gate.is_due(Instant::now()) {
            tokio::time::sleep(POLL_GRANULARITY.min(interval)).await;
            continue;
        }
        debug!(service = name, "Tick");
        tick().await;
        gate.mark(Instant::now());
    }

    info!(service = name, "Service loop stopped");
}
