//! Log Records
//!
//! The record produced by streaming tasks and the upload payloads built
//! from batches of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Level tag attached to every record. Output and error streams are not
/// told apart, so the tag names neither.
pub const DEFAULT_STREAM: &str = "INFO";

/// One log line from one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub container_id: String,
    /// Moment the line was processed by the agent
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    pub timestamp: DateTime<Utc>,
    pub stream: String,
    pub message: String,
}

/// All records of one container, in arrival order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLogs {
    pub container_id: String,
    pub logs: Vec<LogRecord>,
}

/// Records of several containers in one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiContainerLogs {
    pub agent_id: String,
    pub container_logs: Vec<ContainerLogs>,
}

/// A log upload request. The backend client routes on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogUpload {
    Single(LogRecord),
    Container(ContainerLogs),
    MultiContainer(MultiContainerLogs),
}

impl LogUpload {
    /// Build a multi-container upload from a batch
    pub fn from_batch<'a, I>(agent_id: &str, records: I) -> Self
    where
        I: IntoIterator<Item = &'a LogRecord>,
    {
        LogUpload::MultiContainer(MultiContainerLogs {
            agent_id: agent_id.to_string(),
            container_logs: group_by_container(records),
        })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            LogUpload::Single(_) => false,
            LogUpload::Container(logs) => logs.logs.is_empty(),
            LogUpload::MultiContainer(logs) => logs.container_logs.iter().all(|c| c.logs.is_empty()),
        }
    }

    /// Number of records carried
    pub fn len(&self) -> usize {
        match self {
            LogUpload::Single(_) => 1,
            LogUpload::Container(logs) => logs.logs.len(),
            LogUpload::MultiContainer(logs) => logs.container_logs.iter().map(|c| c.logs.len()).sum(),
        }
    }
}

/// Group records by container id.
///
/// Groups appear in order of each container's first record, and records
/// keep their arrival order within a group.
pub fn group_by_container<'a, I>(records: I) -> Vec<ContainerLogs>
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let mut groups: Vec<ContainerLogs> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in records {
        let slot = *index.entry(record.container_id.as_str()).or_insert_with(|| {
            groups.push(ContainerLogs {
                container_id: record.container_id.clone(),
                logs: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].logs.push(record.clone());
    }

    groups
}
