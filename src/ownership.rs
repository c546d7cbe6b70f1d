use crate::error::{ProvisionError, ProvisionResult};
use crate::labels::{ManagedLabels, K8S_MANAGED_BY};
use crate::store::{ManagedResource, ResourceKind, ResourceStore};

/// A resource this tool may mutate, and whether it was created by this call.
#[derive(Debug)]
pub struct ClaimedResource {
    pub resource: ManagedResource,
    pub created: bool,
    pub labels_changed: bool,
}

/// Fetches the resource or creates it empty, then asserts ownership.
///
/// A pre-existing resource must carry `managed-by` equal to the owner in
/// `labels`; anything else is rejected before any mutation. On success the
/// in-memory labels are replaced by `labels`. Nothing is persisted beyond the
/// create, callers decide when to save.
pub async fn claim_resource(
    store: &dyn ResourceStore,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    labels: &ManagedLabels,
) -> ProvisionResult<ClaimedResource> {
    let Some(mut resource) = store.fetch(kind, namespace, name).await? else {
        tracing::info!(%kind, %namespace, %name, "initializing resource");
        let resource = store
            .create_empty(kind, namespace, name, labels.as_map())
            .await?;
        return Ok(ClaimedResource {
            resource,
            created: true,
            labels_changed: false,
        });
    };

    let found = resource.labels.get(K8S_MANAGED_BY);
    if found.map(String::as_str) != Some(labels.owner()) {
        tracing::error!(
            %kind,
            %namespace,
            %name,
            managed_by = ?found,
            expected = labels.owner(),
            "refusing to modify resource owned by other tooling"
        );
        return Err(ProvisionError::OwnershipConflict {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            expected: labels.owner().to_string(),
            found: found.cloned(),
        });
    }

    let labels_changed = resource.labels != *labels.as_map();
    resource.labels = labels.as_map().clone();
    Ok(ClaimedResource {
        resource,
        created: false,
        labels_changed,
    })
}
