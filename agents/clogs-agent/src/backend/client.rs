//! Backend Client
//!
//! The agent-scoped resource hierarchy of the monitoring backend, and an
//! HTTP implementation over reqwest.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::backend::model::{
    AgentRecord, AgentRegistration, ContainerRecord, ContainerRegistration, ContextRecord,
    ContextRegistration,
};
use crate::cli::config::BackendConfig;
use crate::logs::record::LogUpload;
use crate::runtime::adapter::ContainerStatus;

/// Failures at the backend boundary
#[derive(Debug, Error)]
pub enum BackendError {
    /// The resource already exists remotely
    #[error("resource already exists")]
    Conflict,

    #[error("resource not found")]
    NotFound,

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Operations the agent performs against the backend
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn register_agent(&self, agent: &AgentRegistration) -> BackendResult<String>;

    async fn get_agent(&self, agent_id: &str) -> BackendResult<AgentRecord>;

    async fn delete_agent(&self, agent_id: &str) -> BackendResult<()>;

    async fn send_heartbeat(&self, agent_id: &str) -> BackendResult<()>;

    async fn list_contexts(&self, agent_id: &str) -> BackendResult<Vec<ContextRecord>>;

    async fn register_context(
        &self,
        agent_id: &str,
        context: &ContextRegistration,
    ) -> BackendResult<String>;

    async fn delete_context(&self, agent_id: &str, context_id: &str) -> BackendResult<()>;

    async fn list_containers(&self, agent_id: &str) -> BackendResult<Vec<ContainerRecord>>;

    /// Register a container. An existing record surfaces as `BackendError::Conflict`.
    async fn register_container(
        &self,
        agent_id: &str,
        container: &ContainerRegistration,
    ) -> BackendResult<String>;

    async fn delete_container(&self, agent_id: &str, container_id: &str) -> BackendResult<()>;

    /// Push a status transition observed at `since` (unix seconds)
    async fn update_container_status(
        &self,
        agent_id: &str,
        container_id: &str,
        status: ContainerStatus,
        since: i64,
    ) -> BackendResult<()>;

    async fn upload_logs(&self, agent_id: &str, upload: &LogUpload) -> BackendResult<()>;
}

/// HTTP backend client
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Build a client from the backend configuration
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            headers.insert("X-API-Key", HeaderValue::from_str(api_key)?);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    /// Send a request and map non-success statuses onto `BackendError`
    async fn send(&self, request: RequestBuilder) -> BackendResult<reqwest::Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::CONFLICT => Err(BackendError::Conflict),
            StatusCode::NOT_FOUND => Err(BackendError::NotFound),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(BackendError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> BackendResult<T> {
        Ok(self.send(request).await?.json().await?)
    }

    async fn send_empty(&self, request: RequestBuilder) -> BackendResult<()> {
        self.send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn register_agent(&self, agent: &AgentRegistration) -> BackendResult<String> {
        let id: String = self
            .send_json(self.request(Method::POST, "/api/agent/").json(agent))
            .await?;
        debug!(agent_id = %id, "Agent registered");
        Ok(id)
    }

    async fn get_agent(&self, agent_id: &str) -> BackendResult<AgentRecord> {
        self.send_json(self.request(Method::GET, &format!("/api/agent/{}/", agent_id)))
            .await
    }

    async fn delete_agent(&self, agent_id: &str) -> BackendResult<()> {
        self.send_empty(self.request(Method::DELETE, &format!("/api/agent/{}/", agent_id)))
            .await
    }

    async fn send_heartbeat(&self, agent_id: &str) -> BackendResult<()> {
        self.send_empty(self.request(Method::POST, &format!("/api/agent/{}/heartbeat", agent_id)))
            .await
    }

    async fn list_contexts(&self, agent_id: &str) -> BackendResult<Vec<ContextRecord>> {
        self.send_json(self.request(Method::GET, &format!("/api/agent/{}/context/", agent_id)))
            .await
    }

    async fn register_context(
        &self,
        agent_id: &str,
        context: &ContextRegistration,
    ) -> BackendResult<String> {
        self.send_json(
            self.request(Method::PUT, &format!("/api/agent/{}/context/", agent_id))
                .json(context),
        )
        .await
    }

    async fn delete_context(&self, agent_id: &str, context_id: &str) -> BackendResult<()> {
        self.send_empty(self.request(
            Method::DELETE,
            &format!("/api/agent/{}/context/{}/", agent_id, context_id),
        ))
        .await
    }

    async fn list_containers(&self, agent_id: &str) -> BackendResult<Vec<ContainerRecord>> {
        self.send_json(self.request(Method::GET, &format!("/api/agent/{}/container/", agent_id)))
            .await
    }

    async fn register_container(
        &self,
        agent_id: &str,
        container: &ContainerRegistration,
    ) -> BackendResult<String> {
        self.send_json(
            self.request(Method::POST, &format!("/api/agent/{}/container", agent_id))
                .json(container),
        )
        .await
    }

    async fn delete_container(&self, agent_id: &str, container_id: &str) -> BackendResult<()> {
        self.send_empty(self.request(
            Method::DELETE,
            &format!("/api/agent/{}/container/{}/", agent_id, container_id),
        ))
        .await
    }

    async fn update_container_status(
        &self,
        agent_id: &str,
        container_id: &str,
        status: ContainerStatus,
        since: i64,
    ) -> BackendResult<()> {
        let since = since.to_string();
        self.send_empty(
            self.request(
                Method::POST,
                &format!("/api/agent/{}/container/{}/status", agent_id, container_id),
            )
            .query(&[("status", status.as_str()), ("since", since.as_str())]),
        )
        .await
    }

    async fn upload_logs(&self, agent_id: &str, upload: &LogUpload) -> BackendResult<()> {
        if upload.is_empty() {
            return Ok(());
        }

        let request = match upload {
            LogUpload::MultiContainer(logs) => self
                .request(Method::POST, &format!("/api/agent/{}/logs", agent_id))
                .json(logs),
            LogUpload::Container(logs) => self
                .request(
                    Method::POST,
                    &format!("/api/agent/{}/container/{}/logs", agent_id, logs.container_id),
                )
                .json(logs),
            LogUpload::Single(record) => self
                .request(
                    Method::POST,
                    &format!("/api/agent/{}/container/{}/logs", agent_id, record.container_id),
                )
                .json(record),
        };

        self.send_empty(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str, api_key: Option<&str>) -> BackendConfig {
        BackendConfig {
            url: url.to_string(),
            api_key: api_key.map(str::to_string),
            ..BackendConfig::default()
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let backend = HttpBackend::new(&config("http://backend:8000/", None)).unwrap();
        assert_eq!(backend.base_url(), "http://backend:8000");
    }

    #[test]
    fn test_invalid_api_key_rejected() {
        let result = HttpBackend::new(&config("http://backend:8000", Some("bad\nkey")));
        assert!(matches!(result, Err(BackendError::InvalidHeader(_))));
    }

    #[test]
    fn test_empty_api_key_ignored() {
        assert!(HttpBackend::new(&config("http://backend:8000", Some(""))).is_ok());
    }
}
