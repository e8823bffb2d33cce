//! Clogs Agent Library
//!
//! This crate provides the core functionality for the Clogs host agent:
//! container discovery and classification, reconciliation with the
//! monitoring backend, log forwarding and heartbeats.

pub mod agent;
pub mod backend;
pub mod cli;
pub mod discovery;
pub mod logs;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use agent::heartbeat::HeartbeatService;
pub use agent::identity::{obtain_identity, IdentityStore, RetryPolicy};
pub use backend::client::{BackendClient, BackendError, HttpBackend};
pub use cli::config::Config;
pub use discovery::context::{classify, Containment, ContextKey, ExecutionContext};
pub use discovery::engine::DiscoveryService;
pub use discovery::filter::TagFilter;
pub use logs::collector::{LogCollector, PipelineSettings};
pub use runtime::adapter::RuntimeAdapter;
pub use runtime::docker::adapter::DockerAdapter;
