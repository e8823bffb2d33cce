//! Backend Payloads
//!
//! Request and response bodies exchanged with the monitoring backend.

use serde::{Deserialize, Serialize};

use crate::discovery::context::ExecutionContext;
use crate::runtime::adapter::ContainerStatus;

/// Agent registration body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub hostname: String,
    pub version: String,
    pub runtime_type: String,
}

impl AgentRegistration {
    pub fn new(runtime_type: &str) -> Self {
        Self {
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            runtime_type: runtime_type.to_string(),
        }
    }
}

/// Agent as stored by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    #[serde(default)]
    pub hostname: Option<String>,
}

/// Context group registration body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRegistration {
    pub agent_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub context: ExecutionContext,
}

/// Context group as stored by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub context: ExecutionContext,
}

/// Container registration body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRegistration {
    pub id: String,
    pub agent_id: String,
    /// Owning context id; absent for orphans
    pub context: Option<String>,
    pub name: String,
    pub image: String,
    /// Unix seconds
    pub created_at: i64,
}

/// Container as stored by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub status: Option<ContainerStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_registration_serialization() {
        let body = ContextRegistration {
            agent_id: "agent-1".to_string(),
            name: "shop".to_string(),
            context: ExecutionContext::Compose,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "compose");
        assert_eq!(json["name"], "shop");
    }

    #[test]
    fn test_container_record_tolerates_missing_fields() {
        let record: ContainerRecord = serde_json::from_str(r#"{"id": "abc"}"#).unwrap();
        assert_eq!(record.id, "abc");
        assert!(record.context.is_none());
        assert!(record.status.is_none());

        let record: ContainerRecord =
            serde_json::from_str(r#"{"id": "abc", "context": "7", "status": "exited"}"#).unwrap();
        assert_eq!(record.status, Some(ContainerStatus::Exited));
    }
}
