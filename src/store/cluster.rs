use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;

use super::{ManagedResource, ResourceKind, ResourceStore, StoreError};

/// Secrets and markers backed by core/v1 Secrets and ConfigMaps.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// In-cluster service account config, falling back to the local kubeconfig.
    pub async fn try_default() -> Result<Self, kube::Error> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn empty_meta(namespace: &str, name: &str, labels: &BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels.clone()),
        ..Default::default()
    }
}

fn from_secret(namespace: &str, name: &str, secret: Secret) -> ManagedResource {
    ManagedResource {
        kind: ResourceKind::Secret,
        namespace: namespace.to_string(),
        name: name.to_string(),
        labels: secret.metadata.labels.unwrap_or_default(),
        data: secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, ByteString(value))| (key, value))
            .collect(),
        resource_version: secret.metadata.resource_version,
    }
}

fn from_config_map(namespace: &str, name: &str, config_map: ConfigMap) -> ManagedResource {
    ManagedResource {
        kind: ResourceKind::Marker,
        namespace: namespace.to_string(),
        name: name.to_string(),
        labels: config_map.metadata.labels.unwrap_or_default(),
        data: config_map
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.into_bytes()))
            .collect(),
        resource_version: config_map.metadata.resource_version,
    }
}

fn marker_data(resource: &ManagedResource) -> Result<BTreeMap<String, String>, StoreError> {
    resource
        .data
        .iter()
        .map(|(key, value)| {
            String::from_utf8(value.clone())
                .map(|value| (key.clone(), value))
                .map_err(|_| StoreError::InvalidData {
                    kind: resource.kind,
                    namespace: resource.namespace.clone(),
                    name: resource.name.clone(),
                    key: key.clone(),
                })
        })
        .collect()
}

fn write_error(err: kube::Error, resource: &ManagedResource) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 409 => StoreError::conflict(resource),
        kube::Error::Api(response) if response.code == 404 => StoreError::not_found(resource),
        other => StoreError::Kube(other),
    }
}

fn check_version(
    live_version: &Option<String>,
    resource: &ManagedResource,
) -> Result<(), StoreError> {
    if *live_version != resource.resource_version {
        tracing::warn!(
            kind = %resource.kind,
            namespace = %resource.namespace,
            name = %resource.name,
            observed = ?resource.resource_version,
            live = ?live_version,
            "resource changed since it was read"
        );
        return Err(StoreError::conflict(resource));
    }
    Ok(())
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn fetch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>, StoreError> {
        let resource = match kind {
            ResourceKind::Secret => self
                .secrets(namespace)
                .get_opt(name)
                .await?
                .map(|secret| from_secret(namespace, name, secret)),
            ResourceKind::Marker => self
                .config_maps(namespace)
                .get_opt(name)
                .await?
                .map(|config_map| from_config_map(namespace, name, config_map)),
        };
        Ok(resource)
    }

    async fn create_empty(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<ManagedResource, StoreError> {
        let pending = ManagedResource::empty(kind, namespace, name, labels.clone());
        let metadata = empty_meta(namespace, name, labels);
        let params = PostParams::default();
        let created = match kind {
            ResourceKind::Secret => {
                let secret = Secret {
                    metadata,
                    ..Default::default()
                };
                let created = self
                    .secrets(namespace)
                    .create(&params, &secret)
                    .await
                    .map_err(|err| write_error(err, &pending))?;
                from_secret(namespace, name, created)
            }
            ResourceKind::Marker => {
                let config_map = ConfigMap {
                    metadata,
                    ..Default::default()
                };
                let created = self
                    .config_maps(namespace)
                    .create(&params, &config_map)
                    .await
                    .map_err(|err| write_error(err, &pending))?;
                from_config_map(namespace, name, created)
            }
        };
        tracing::debug!(%kind, %namespace, %name, "created empty resource");
        Ok(created)
    }

    async fn save(&self, resource: &ManagedResource) -> Result<ManagedResource, StoreError> {
        let namespace = resource.namespace.as_str();
        let name = resource.name.as_str();
        let params = PostParams::default();
        // Labels and data are replaced on the live object so that annotations,
        // type and owner references written by other tooling survive.
        match resource.kind {
            ResourceKind::Secret => {
                let api = self.secrets(namespace);
                let mut live = api
                    .get_opt(name)
                    .await?
                    .ok_or_else(|| StoreError::not_found(resource))?;
                check_version(&live.metadata.resource_version, resource)?;
                live.metadata.labels = Some(resource.labels.clone());
                live.data = Some(
                    resource
                        .data
                        .iter()
                        .map(|(key, value)| (key.clone(), ByteString(value.clone())))
                        .collect(),
                );
                live.string_data = None;
                let saved = api
                    .replace(name, &params, &live)
                    .await
                    .map_err(|err| write_error(err, resource))?;
                Ok(from_secret(namespace, name, saved))
            }
            ResourceKind::Marker => {
                let data = marker_data(resource)?;
                let api = self.config_maps(namespace);
                let mut live = api
                    .get_opt(name)
                    .await?
                    .ok_or_else(|| StoreError::not_found(resource))?;
                check_version(&live.metadata.resource_version, resource)?;
                live.metadata.labels = Some(resource.labels.clone());
                live.data = Some(data);
                let saved = api
                    .replace(name, &params, &live)
                    .await
                    .map_err(|err| write_error(err, resource))?;
                Ok(from_config_map(namespace, name, saved))
            }
        }
    }
}
