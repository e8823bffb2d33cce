//! Log Batch
//!
//! Accumulates records for the sender and decides when to flush. When the
//! backend stays unreachable the batch is capped by dropping its oldest
//! records.

use std::time::{Duration, Instant};

use crate::logs::record::{LogRecord, LogUpload};

/// Flush and retention limits
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    /// Size at which a batch is flushed
    pub max_batch: usize,
    /// Age since the last flush at which a non-empty batch is flushed
    pub flush_interval: Duration,
    /// Hard ceiling on records retained across failed flushes
    pub max_buffered: usize,
}

pub struct Batch {
    records: Vec<LogRecord>,
    last_flush: Instant,
    limits: BatchLimits,
}

impl Batch {
    pub fn new(limits: BatchLimits, now: Instant) -> Self {
        Self {
            records: Vec::with_capacity(limits.max_batch),
            last_flush: now,
            limits,
        }
    }

    pub fn push(&mut self, record: LogRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn should_flush(&self, now: Instant) -> bool {
        if self.records.is_empty() {
            return false;
        }
        self.records.len() >= self.limits.max_batch
            || now.saturating_duration_since(self.last_flush) >= self.limits.flush_interval
    }

    /// Upload request for everything currently buffered
    pub fn to_upload(&self, agent_id: &str) -> LogUpload {
        LogUpload::from_batch(agent_id, &self.records)
    }

    /// The buffered records were delivered
    pub fn flushed(&mut self, now: Instant) {
        self.records.clear();
        self.last_flush = now;
    }

    /// Drop the oldest records beyond the hard ceiling; returns how many
    pub fn enforce_ceiling(&mut self) -> usize {
        let excess = self.records.len().saturating_sub(self.limits.max_buffered);
        if excess > 0 {
            self.records.drain(..excess);
        }
        excess
    }
}
