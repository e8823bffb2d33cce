//! Agent Identity
//!
//! Persists the backend-assigned agent id across restarts and validates it
//! against the backend on startup.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::backend::client::{BackendClient, BackendError};
use crate::backend::model::AgentRegistration;

/// File-backed store for the agent id
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The persisted id, if any. Blank files count as no id.
    pub fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read identity file: {}", self.path.display()))?;
        let id = content.trim();
        Ok((!id.is_empty()).then(|| id.to_string()))
    }

    pub fn save(&self, id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(&self.path, id)
            .with_context(|| format!("Failed to write identity file: {}", self.path.display()))
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).with_context(|| {
                format!("Failed to remove identity file: {}", self.path.display())
            })?;
        }
        Ok(())
    }
}

/// Bounded retry for identity calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

/// Validate the persisted id or register a new agent.
///
/// A persisted id the backend no longer knows is discarded. Other failures
/// are retried after `retry.delay`; running out of attempts is an error.
pub async fn obtain_identity<B: BackendClient + ?Sized>(
    backend: &B,
    store: &IdentityStore,
    runtime_type: &str,
    retry: RetryPolicy,
) -> Result<String> {
    for attempt in 1..=retry.attempts {
        match try_obtain(backend, store, runtime_type).await {
            Ok(id) => return Ok(id),
            Err(e) => {
                warn!(
                    attempt,
                    attempts = retry.attempts,
                    error = %format!("{:#}", e),
                    "Failed to obtain agent identity"
                );
                if attempt < retry.attempts {
                    tokio::time::sleep(retry.delay).await;
                }
            }
        }
    }

    bail!(
        "Failed to obtain agent identity after {} attempts",
        retry.attempts
    )
}

async fn try_obtain<B: BackendClient + ?Sized>(
    backend: &B,
    store: &IdentityStore,
    runtime_type: &str,
) -> Result<String> {
    if let Some(id) = store.load()? {
        match backend.get_agent(&id).await {
            Ok(_) => {
                info!(agent_id = %id, "Agent identity confirmed");
                return Ok(id);
            }
            Err(BackendError::NotFound) => {
                warn!(agent_id = %id, "Persisted agent id unknown to backend, registering anew");
                store.clear()?;
            }
            Err(e) => return Err(e).context("Failed to validate agent id"),
        }
    }

    let id = backend
        .register_agent(&AgentRegistration::new(runtime_type))
        .await
        .context("Failed to register agent")?;
    store.save(&id)?;
    info!(agent_id = %id, "Agent registered");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    fn retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_store_round_trip_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join(".clogs/agent/id"));

        assert_eq!(store.load().unwrap(), None);
        store.save("agent-42").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("agent-42"));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_blank_file_is_no_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id");
        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(IdentityStore::new(path).load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_first_start_registers_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("id"));
        let backend = FakeBackend::new();

        let id = obtain_identity(&backend, &store, "docker", retry(3)).await.unwrap();

        assert_eq!(backend.agent_registrations(), 1);
        assert_eq!(store.load().unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_known_identity_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("id"));
        store.save("agent-7").unwrap();
        let backend = FakeBackend::new();
        backend.add_agent("agent-7");

        let id = obtain_identity(&backend, &store, "docker", retry(3)).await.unwrap();

        assert_eq!(id, "agent-7");
        assert_eq!(backend.agent_registrations(), 0);
    }

    #[tokio::test]
    async fn test_stale_identity_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("id"));
        store.save("deleted-agent").unwrap();
        let backend = FakeBackend::new();

        let id = obtain_identity(&backend, &store, "docker", retry(3)).await.unwrap();

        assert_ne!(id, "deleted-agent");
        assert_eq!(backend.agent_registrations(), 1);
        assert_eq!(store.load().unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("id"));
        let backend = FakeBackend::new();
        backend.fail_agent_calls(2);

        let id = obtain_identity(&backend, &store, "docker", retry(3)).await.unwrap();
        assert_eq!(store.load().unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("id"));
        let backend = FakeBackend::new();
        backend.fail_agent_calls(10);

        let err = obtain_identity(&backend, &store, "docker", retry(3))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("3 attempts"));
        assert_eq!(store.load().unwrap(), None);
    }
}
