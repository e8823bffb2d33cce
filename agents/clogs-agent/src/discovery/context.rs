//! Context Classifier
//!
//! Sorts containers into deployment groupings by their labels, and works out
//! which grouping the agent itself runs in.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::runtime::adapter::RuntimeAdapter;

/// Label set by `docker stack deploy`
pub const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";

/// Label set by `docker compose`
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Files whose control-group paths may carry the agent's own container id
const CGROUP_SOURCES: [&str; 2] = ["/proc/1/cpuset", "/proc/self/cgroup"];

/// Deployment grouping of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    Orphan,
    Compose,
    Stack,
    Host,
}

impl std::fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionContext::Orphan => write!(f, "orphan"),
            ExecutionContext::Compose => write!(f, "compose"),
            ExecutionContext::Stack => write!(f, "stack"),
            ExecutionContext::Host => write!(f, "host"),
        }
    }
}

/// A grouping: execution context plus the compose project or stack name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey {
    pub context: ExecutionContext,
    pub group: Option<String>,
}

impl ContextKey {
    pub fn new(context: ExecutionContext, group: Option<String>) -> Self {
        Self { context, group }
    }

    pub fn orphan() -> Self {
        Self::new(ExecutionContext::Orphan, None)
    }

    pub fn host() -> Self {
        Self::new(ExecutionContext::Host, None)
    }

    pub fn is_orphan(&self) -> bool {
        self.context == ExecutionContext::Orphan
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}/{}", self.context, group),
            None => write!(f, "{}", self.context),
        }
    }
}

/// Classify a label set. A stack namespace wins over a compose project.
pub fn classify(labels: &HashMap<String, String>) -> ContextKey {
    if let Some(stack) = labels.get(STACK_NAMESPACE_LABEL) {
        return ContextKey::new(ExecutionContext::Stack, Some(stack.clone()));
    }
    if let Some(project) = labels.get(COMPOSE_PROJECT_LABEL) {
        return ContextKey::new(ExecutionContext::Compose, Some(project.clone()));
    }
    ContextKey::orphan()
}

/// Where the agent's own container id candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfIdSource {
    Hostname,
    ControlGroup,
    /// Nothing id-shaped was found; the raw hostname is tried anyway
    HostnameFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfId {
    pub id: String,
    pub source: SelfIdSource,
}

fn looks_like_container_id(candidate: &str) -> bool {
    matches!(candidate.len(), 12 | 64) && candidate.chars().all(|c| c.is_ascii_hexdigit())
}

/// Pull a container id out of control-group membership paths
pub fn container_id_from_cgroup(content: &str) -> Option<String> {
    content
        .split(|c: char| c == '/' || c == ':' || c.is_whitespace())
        .map(|segment| {
            let segment = segment.strip_prefix("docker-").unwrap_or(segment);
            segment.strip_suffix(".scope").unwrap_or(segment)
        })
        .find(|segment| looks_like_container_id(segment))
        .map(str::to_string)
}

/// Derive the agent's own container id candidate
pub fn derive_self_id(hostname: &str, cgroup_contents: &[String]) -> SelfId {
    if looks_like_container_id(hostname) {
        return SelfId {
            id: hostname.to_string(),
            source: SelfIdSource::Hostname,
        };
    }

    if let Some(id) = cgroup_contents
        .iter()
        .find_map(|content| container_id_from_cgroup(content))
    {
        return SelfId {
            id,
            source: SelfIdSource::ControlGroup,
        };
    }

    SelfId {
        id: hostname.to_string(),
        source: SelfIdSource::HostnameFallback,
    }
}

/// Resolve a derived id against the runtime and classify the result.
///
/// An id that resolves to no container means the agent runs on the host;
/// any other lookup failure classifies as orphan.
pub async fn classify_self<R: RuntimeAdapter + ?Sized>(runtime: &R, self_id: &SelfId) -> ContextKey {
    match runtime.get_container(&self_id.id).await {
        Ok(Some(container)) => {
            let key = classify(&container.labels);
            info!(container_id = %self_id.id, context = %key, "Agent runs inside a container");
            key
        }
        Ok(None) => {
            if self_id.source == SelfIdSource::HostnameFallback {
                info!(hostname = %self_id.id, "No container matches the hostname, running on the host");
            } else {
                warn!(container_id = %self_id.id, "Derived container id not found, assuming host");
            }
            ContextKey::host()
        }
        Err(e) => {
            warn!(container_id = %self_id.id, error = %e, "Failed to look up own container");
            ContextKey::orphan()
        }
    }
}

/// Work out the agent's own grouping from the host environment
pub async fn identify_self<R: RuntimeAdapter + ?Sized>(runtime: &R) -> ContextKey {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();

    let cgroup_contents: Vec<String> = CGROUP_SOURCES
        .iter()
        .filter_map(|path| match std::fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(path = %path, error = %e, "Skipping control group source");
                None
            }
        })
        .collect();

    let self_id = derive_self_id(&hostname, &cgroup_contents);
    debug!(id = %self_id.id, source = ?self_id.source, "Derived own container id");
    classify_self(runtime, &self_id).await
}

/// Which groupings reconciliation may touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Containment {
    /// Every grouping is monitored
    CrossBoundary,
    /// Only the agent's own grouping is monitored
    Bounded(ContextKey),
}

impl Containment {
    /// Containment for an agent classified as `own`. Running on the host always
    /// crosses boundaries.
    pub fn for_agent(own: &ContextKey, force_cross_boundary: bool) -> Self {
        if force_cross_boundary || own.context == ExecutionContext::Host {
            Containment::CrossBoundary
        } else {
            Containment::Bounded(own.clone())
        }
    }

    pub fn admits(&self, key: &ContextKey) -> bool {
        match self {
            Containment::CrossBoundary => true,
            Containment::Bounded(own) => own == key,
        }
    }

    pub fn is_cross_boundary(&self) -> bool {
        matches!(self, Containment::CrossBoundary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{container, FakeRuntime};

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const FULL_ID: &str = "4f1c9b2a7d3e8f6051a2b3c4d5e6f7081920a1b2c3d4e5f60718293a4b5c6d7e";

    #[test]
    fn test_stack_label_wins_over_compose() {
        let key = classify(&labels(&[
            (COMPOSE_PROJECT_LABEL, "shop"),
            (STACK_NAMESPACE_LABEL, "prod"),
        ]));
        assert_eq!(key, ContextKey::new(ExecutionContext::Stack, Some("prod".to_string())));
    }

    #[test]
    fn test_compose_project() {
        let key = classify(&labels(&[(COMPOSE_PROJECT_LABEL, "shop")]));
        assert_eq!(key, ContextKey::new(ExecutionContext::Compose, Some("shop".to_string())));
    }

    #[test]
    fn test_unlabelled_is_orphan() {
        assert_eq!(classify(&labels(&[("app", "web")])), ContextKey::orphan());
    }

    #[test]
    fn test_container_id_from_cgroup_v1() {
        let content = format!("12:cpuset:/docker/{}\n11:memory:/docker/{}\n", FULL_ID, FULL_ID);
        assert_eq!(container_id_from_cgroup(&content).as_deref(), Some(FULL_ID));
    }

    #[test]
    fn test_container_id_from_cgroup_v2_scope() {
        let content = format!("0::/system.slice/docker-{}.scope\n", FULL_ID);
        assert_eq!(container_id_from_cgroup(&content).as_deref(), Some(FULL_ID));
    }

    #[test]
    fn test_container_id_from_cgroup_short_id() {
        assert_eq!(
            container_id_from_cgroup("/docker/4f1c9b2a7d3e").as_deref(),
            Some("4f1c9b2a7d3e")
        );
    }

    #[test]
    fn test_container_id_from_cgroup_host() {
        assert_eq!(container_id_from_cgroup("0::/init.scope\n"), None);
        assert_eq!(container_id_from_cgroup("/user.slice/abcdefghijkl"), None);
    }

    #[test]
    fn test_derive_self_id_prefers_hostname() {
        let id = derive_self_id("4f1c9b2a7d3e", &[format!("/docker/{}", FULL_ID)]);
        assert_eq!(id.id, "4f1c9b2a7d3e");
        assert_eq!(id.source, SelfIdSource::Hostname);
    }

    #[test]
    fn test_derive_self_id_from_cgroup() {
        let id = derive_self_id("buildbox", &[String::new(), format!("/docker/{}", FULL_ID)]);
        assert_eq!(id.id, FULL_ID);
        assert_eq!(id.source, SelfIdSource::ControlGroup);
    }

    #[test]
    fn test_derive_self_id_fallback() {
        let id = derive_self_id("buildbox", &["0::/init.scope".to_string()]);
        assert_eq!(id.id, "buildbox");
        assert_eq!(id.source, SelfIdSource::HostnameFallback);
    }

    #[tokio::test]
    async fn test_classify_self_in_compose() {
        let runtime = FakeRuntime::new();
        runtime.add(container("4f1c9b2a7d3e", "agent", &[(COMPOSE_PROJECT_LABEL, "shop")]));

        let self_id = derive_self_id("4f1c9b2a7d3e", &[]);
        let key = classify_self(&runtime, &self_id).await;
        assert_eq!(key, ContextKey::new(ExecutionContext::Compose, Some("shop".to_string())));
    }

    #[tokio::test]
    async fn test_classify_self_not_found_is_host() {
        let runtime = FakeRuntime::new();
        let self_id = derive_self_id("buildbox", &[]);
        assert_eq!(classify_self(&runtime, &self_id).await, ContextKey::host());
    }

    #[tokio::test]
    async fn test_classify_self_lookup_failure_is_orphan() {
        let runtime = FakeRuntime::new();
        runtime.fail_inspect(true);
        let self_id = derive_self_id("4f1c9b2a7d3e", &[]);
        assert_eq!(classify_self(&runtime, &self_id).await, ContextKey::orphan());
    }

    #[test]
    fn test_host_forces_cross_boundary() {
        assert!(Containment::for_agent(&ContextKey::host(), false).is_cross_boundary());
        assert!(Containment::for_agent(&ContextKey::orphan(), true).is_cross_boundary());
    }

    #[test]
    fn test_bounded_containment_admits_own_group_only() {
        let own = ContextKey::new(ExecutionContext::Compose, Some("shop".to_string()));
        let containment = Containment::for_agent(&own, false);

        assert!(containment.admits(&own));
        assert!(!containment.admits(&ContextKey::new(
            ExecutionContext::Compose,
            Some("billing".to_string())
        )));
        assert!(!containment.admits(&ContextKey::new(
            ExecutionContext::Stack,
            Some("shop".to_string())
        )));
        assert!(!containment.admits(&ContextKey::orphan()));
    }
}
