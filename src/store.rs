//! Namespaced, labeled key/value resources and the store they live in.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub mod cluster;
pub mod memory;

pub use cluster::KubeStore;
pub use memory::InMemoryStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Opaque binary values (core/v1 Secret).
    Secret,
    /// String values (core/v1 ConfigMap).
    Marker,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Secret => "secret",
            ResourceKind::Marker => "configmap",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedResource {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, Vec<u8>>,
    /// Version observed when the resource was read; `save` rejects the write
    /// if the stored resource has moved on since.
    pub resource_version: Option<String>,
}

impl ManagedResource {
    pub fn empty(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            labels,
            data: BTreeMap::new(),
            resource_version: None,
        }
    }

    pub fn value(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    pub fn value_str(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(|value| std::str::from_utf8(value).ok())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} was modified concurrently")]
    Conflict {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name} holds invalid data under `{key}`")]
    InvalidData {
        kind: ResourceKind,
        namespace: String,
        name: String,
        key: String,
    },
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
}

impl StoreError {
    pub(crate) fn conflict(resource: &ManagedResource) -> Self {
        StoreError::Conflict {
            kind: resource.kind,
            namespace: resource.namespace.clone(),
            name: resource.name.clone(),
        }
    }

    pub(crate) fn not_found(resource: &ManagedResource) -> Self {
        StoreError::NotFound {
            kind: resource.kind,
            namespace: resource.namespace.clone(),
            name: resource.name.clone(),
        }
    }
}

/// get / create / update on named, namespaced, labeled key/value resources.
/// Ownership checks are left to callers.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn fetch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>, StoreError>;

    async fn create_empty(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<ManagedResource, StoreError>;

    async fn save(&self, resource: &ManagedResource) -> Result<ManagedResource, StoreError>;
}
