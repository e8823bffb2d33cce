//! Container Log Streaming
//!
//! One streaming task per monitored container: follows the runtime's log
//! stream and turns each timestamped line into a `LogRecord`.

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::logs::record::{LogRecord, DEFAULT_STREAM};
use crate::runtime::adapter::RuntimeAdapter;

/// Turn one timestamped runtime line into a record.
///
/// The leading timestamp token is discarded and the record is stamped with
/// `now`. Lines without a separable timestamp yield `None`.
pub fn parse_line(container_id: &str, line: &str, now: DateTime<Utc>) -> Option<LogRecord> {
    let (_timestamp, content) = line.split_once(' ')?;
    Some(LogRecord {
        container_id: container_id.to_string(),
        timestamp: now,
        stream: DEFAULT_STREAM.to_string(),
        message: content.trim().to_string(),
    })
}

/// Follow one container's logs until cancelled or the stream ends.
///
/// A stream ending is expected when the container stops or is removed.
pub async fn follow_container<R: RuntimeAdapter + ?Sized>(
    runtime: Arc<R>,
    container_id: String,
    queue: mpsc::Sender<LogRecord>,
    cancel: CancellationToken,
) {
    let mut lines = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = runtime.stream_logs(&container_id) => match opened {
            Ok(lines) => lines,
            Err(e) => {
                debug!(container_id = %container_id, error = %e, "Failed to open log stream");
                return;
            }
        },
    };

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = lines.next() => chunk,
        };

        let chunk = match chunk {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                debug!(container_id = %container_id, error = %e, "Log stream ended");
                break;
            }
            None => {
                debug!(container_id = %container_id, "Log stream closed");
                break;
            }
        };

        for line in chunk.lines().filter(|l| !l.is_empty()) {
            let Some(record) = parse_line(&container_id, line, Utc::now()) else {
                warn!(container_id = %container_id, line = %line, "Dropping log line without timestamp");
                continue;
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = queue.send(record) => {
                    if sent.is_err() {
                        debug!(container_id = %container_id, "Log queue closed");
                        return;
                    }
                }
            }
        }
    }
}
