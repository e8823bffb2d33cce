//! Registration Registries
//!
//! In-memory record of what the discovery engine has told the backend.
//! Each registry is owned by the engine and guarded by its own lock.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::discovery::context::ContextKey;
use crate::runtime::adapter::ContainerStatus;

/// Context groups registered remotely, keyed by grouping.
///
/// Entries are never removed while the agent runs; the backend may collect
/// empty groups on its own.
#[derive(Default)]
pub struct ContextRegistry {
    inner: Mutex<HashMap<ContextKey, String>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote id of a registered grouping
    pub fn get(&self, key: &ContextKey) -> Option<String> {
        self.inner.lock().get(key).cloned()
    }

    /// Record a grouping's remote id. The first id recorded for a key wins.
    pub fn insert(&self, key: ContextKey, id: String) {
        self.inner.lock().entry(key).or_insert(id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// What the engine remembers about one registered container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredContainer {
    /// Last status pushed or observed; `None` until one is known
    pub status: Option<ContainerStatus>,
    pub context_id: Option<String>,
}

/// Containers registered remotely, keyed by container id
#[derive(Default)]
pub struct ContainerRegistry {
    inner: Mutex<HashMap<String, RegisteredContainer>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<RegisteredContainer> {
        self.inner.lock().get(id).cloned()
    }

    pub fn insert(&self, id: String, entry: RegisteredContainer) {
        self.inner.lock().insert(id, entry);
    }

    /// Update the recorded status of a registered container.
    /// Returns false when the id is not registered.
    pub fn set_status(&self, id: &str, status: ContainerStatus) -> bool {
        match self.inner.lock().get_mut(id) {
            Some(entry) => {
                entry.status = Some(status);
                true
            }
            None => false,
        }
    }

    /// Registered ids missing from a full scan
    pub fn absent_from(&self, scanned: &HashSet<String>) -> Vec<String> {
        let mut absent: Vec<String> = self
            .inner
            .lock()
            .keys()
            .filter(|id| !scanned.contains(*id))
            .cloned()
            .collect();
        absent.sort();
        absent
    }

    /// Drop a container together with its status record
    pub fn remove(&self, id: &str) -> Option<RegisteredContainer> {
        self.inner.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
