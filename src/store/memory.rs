use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{ManagedResource, ResourceKind, ResourceStore, StoreError};

type ResourceKey = (ResourceKind, String, String);

/// Process-local store with the same optimistic-concurrency rules as the
/// cluster: every write bumps the resource version and a save carrying a stale
/// version is rejected with a conflict.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    resources: Arc<DashMap<ResourceKey, ManagedResource>>,
    next_version: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Inserts or replaces a resource as if another tool had written it.
    pub fn seed(&self, mut resource: ManagedResource) -> ManagedResource {
        resource.resource_version = Some(self.bump());
        self.resources
            .insert(key_of(resource.kind, &resource.namespace, &resource.name), resource.clone());
        resource
    }

    pub fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<ManagedResource> {
        self.resources
            .get(&key_of(kind, namespace, name))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

fn key_of(kind: ResourceKind, namespace: &str, name: &str) -> ResourceKey {
    (kind, namespace.to_string(), name.to_string())
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn fetch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>, StoreError> {
        Ok(self.get(kind, namespace, name))
    }

    async fn create_empty(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<ManagedResource, StoreError> {
        let mut resource = ManagedResource::empty(kind, namespace, name, labels.clone());
        match self.resources.entry(key_of(kind, namespace, name)) {
            Entry::Occupied(_) => Err(StoreError::conflict(&resource)),
            Entry::Vacant(slot) => {
                resource.resource_version = Some(self.bump());
                slot.insert(resource.clone());
                Ok(resource)
            }
        }
    }

    async fn save(&self, resource: &ManagedResource) -> Result<ManagedResource, StoreError> {
        match self
            .resources
            .entry(key_of(resource.kind, &resource.namespace, &resource.name))
        {
            Entry::Vacant(_) => Err(StoreError::not_found(resource)),
            Entry::Occupied(mut current) => {
                if current.get().resource_version != resource.resource_version {
                    return Err(StoreError::conflict(resource));
                }
                let mut saved = resource.clone();
                saved.resource_version = Some(self.bump());
                current.insert(saved.clone());
                Ok(saved)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_save_is_a_conflict() {
        let store = InMemoryStore::new();
        let created = store
            .create_empty(ResourceKind::Secret, "ns", "s", &BTreeMap::new())
            .await
            .expect("create");

        let mut first = created.clone();
        first.data.insert("a".into(), b"1".to_vec());
        store.save(&first).await.expect("first save");

        let mut second = created;
        second.data.insert("b".into(), b"2".to_vec());
        let err = store.save(&second).await.expect_err("stale save");
        assert!(matches!(err, StoreError::Conflict { .. }));

        let stored = store.get(ResourceKind::Secret, "ns", "s").expect("stored");
        assert_eq!(stored.value("a"), Some(&b"1"[..]));
        assert_eq!(stored.value("b"), None);
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict() {
        let store = InMemoryStore::new();
        store
            .create_empty(ResourceKind::Marker, "ns", "m", &BTreeMap::new())
            .await
            .expect("create");
        let err = store
            .create_empty(ResourceKind::Marker, "ns", "m", &BTreeMap::new())
            .await
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::Conflict { .. }));
        // Same name under the other kind is a different resource.
        store
            .create_empty(ResourceKind::Secret, "ns", "m", &BTreeMap::new())
            .await
            .expect("secret with same name");
        assert_eq!(store.len(), 2);
    }
}
