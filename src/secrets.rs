//! Idempotent generation and storage of secrets, including signing key rotation.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ProvisionError, ProvisionResult};
use crate::generators::{self, SecretKind};
use crate::labels::{ManagedLabels, ToolIdentity};
use crate::ownership::claim_resource;
use crate::signing_key::{self, SigningKeyValue};
use crate::store::{ResourceKind, ResourceStore};

pub const DEFAULT_EXPIRED_KEYS_KEY: &str = "old_signing_keys.yaml";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedSecretSpec {
    pub resource_name: String,
    pub key: String,
    pub kind: SecretKind,
}

impl GeneratedSecretSpec {
    pub fn new(resource_name: impl Into<String>, key: impl Into<String>, kind: SecretKind) -> Self {
        Self {
            resource_name: resource_name.into(),
            key: key.into(),
            kind,
        }
    }
}

impl FromStr for GeneratedSecretSpec {
    type Err = ProvisionError;

    /// `name:key:kind[:argument]`
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = raw.trim().split(':').collect();
        let (name, key, kind, argument) = match parts.as_slice() {
            [name, key, kind] => (*name, *key, *kind, None),
            [name, key, kind, argument] => (*name, *key, *kind, Some(*argument)),
            _ => {
                return Err(ProvisionError::InvalidSpec(format!(
                    "expected <name:key:type[:argument]>, got `{raw}`"
                )))
            }
        };
        if name.is_empty() || key.is_empty() {
            return Err(ProvisionError::InvalidSpec(format!(
                "secret name and key must be set in `{raw}`"
            )));
        }
        let kind = SecretKind::from_token(kind, argument)?;
        Ok(Self::new(name, key, kind))
    }
}

/// Validated set of specs, with one `ExpireKey` spec inferred per resource
/// holding signing keys.
#[derive(Clone, Debug)]
pub struct SecretBatch {
    specs: Vec<GeneratedSecretSpec>,
}

impl SecretBatch {
    pub fn new(
        specs: Vec<GeneratedSecretSpec>,
        expired_keys_key: &str,
    ) -> ProvisionResult<Self> {
        let mut declared: BTreeMap<(&str, &str), SecretKind> = BTreeMap::new();
        for spec in &specs {
            if let Some(previous) =
                declared.insert((spec.resource_name.as_str(), spec.key.as_str()), spec.kind)
            {
                if previous != spec.kind {
                    return Err(ProvisionError::InvalidSpec(format!(
                        "{}:{} is declared as both {previous} and {}",
                        spec.resource_name, spec.key, spec.kind
                    )));
                }
            }
        }

        let explicit: BTreeSet<&str> = specs
            .iter()
            .filter(|spec| spec.kind == SecretKind::ExpireKey)
            .map(|spec| spec.resource_name.as_str())
            .collect();
        let signing: BTreeSet<&str> = specs
            .iter()
            .filter(|spec| spec.kind == SecretKind::SigningKey)
            .map(|spec| spec.resource_name.as_str())
            .collect();

        let mut inferred = Vec::new();
        for resource_name in signing.difference(&explicit) {
            if declared.contains_key(&(*resource_name, expired_keys_key)) {
                return Err(ProvisionError::InvalidSpec(format!(
                    "{resource_name}:{expired_keys_key} is reserved for expired signing keys"
                )));
            }
            inferred.push(GeneratedSecretSpec::new(
                *resource_name,
                expired_keys_key,
                SecretKind::ExpireKey,
            ));
        }

        let mut seen = BTreeSet::new();
        let mut specs: Vec<GeneratedSecretSpec> = specs
            .into_iter()
            .filter(|spec| seen.insert((spec.resource_name.clone(), spec.key.clone())))
            .collect();
        specs.extend(inferred);
        Ok(Self { specs })
    }

    /// Comma-separated list of `name:key:kind[:argument]`.
    pub fn parse(raw: &str, expired_keys_key: &str) -> ProvisionResult<Self> {
        let specs = raw
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(str::parse)
            .collect::<ProvisionResult<Vec<GeneratedSecretSpec>>>()?;
        if specs.is_empty() {
            return Err(ProvisionError::InvalidSpec("no secrets to generate".into()));
        }
        Self::new(specs, expired_keys_key)
    }

    pub fn specs(&self) -> &[GeneratedSecretSpec] {
        &self.specs
    }

    /// Kinds declared for keys of `resource_name`.
    pub fn declared_kinds(&self, resource_name: &str) -> BTreeMap<String, SecretKind> {
        self.specs
            .iter()
            .filter(|spec| spec.resource_name == resource_name)
            .map(|spec| (spec.key.clone(), spec.kind))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretOutcome {
    Generated,
    Unchanged,
    Rotated,
    ExpiredKeysRecorded { rotations: usize },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub generated: Vec<(String, String)>,
    pub unchanged: Vec<(String, String)>,
    pub rotated: Vec<(String, String)>,
}

pub struct SecretProvisioner {
    store: Arc<dyn ResourceStore>,
    namespace: String,
    labels: ManagedLabels,
}

impl SecretProvisioner {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        namespace: impl Into<String>,
        identity: &ToolIdentity,
        extra_labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            labels: ManagedLabels::new(identity.init_secrets(), extra_labels),
        }
    }

    /// Runs every `ExpireKey` spec before any other spec. The tombstone pass
    /// must observe signing keys as they were before this run replaces them.
    pub async fn provision_batch(&self, batch: &SecretBatch) -> ProvisionResult<BatchReport> {
        let mut due: BTreeSet<(String, String)> = BTreeSet::new();
        for spec in batch
            .specs()
            .iter()
            .filter(|spec| spec.kind == SecretKind::ExpireKey)
        {
            let declared = batch.declared_kinds(&spec.resource_name);
            for key in self.record_expired_keys(spec, &declared).await? {
                due.insert((spec.resource_name.clone(), key));
            }
        }

        let mut report = BatchReport::default();
        for spec in batch
            .specs()
            .iter()
            .filter(|spec| spec.kind != SecretKind::ExpireKey)
        {
            let id = (spec.resource_name.clone(), spec.key.clone());
            let force_overwrite = spec.kind == SecretKind::SigningKey && due.contains(&id);
            match self.provision(spec, force_overwrite).await? {
                SecretOutcome::Generated => report.generated.push(id),
                SecretOutcome::Rotated => report.rotated.push(id),
                SecretOutcome::Unchanged | SecretOutcome::ExpiredKeysRecorded { .. } => {
                    report.unchanged.push(id)
                }
            }
        }
        Ok(report)
    }

    /// Generates `spec.key` if it is absent. An existing value is only
    /// replaced when `force_overwrite` is set and the value is still a
    /// signing key due for rotation.
    pub async fn provision(
        &self,
        spec: &GeneratedSecretSpec,
        force_overwrite: bool,
    ) -> ProvisionResult<SecretOutcome> {
        if spec.kind == SecretKind::ExpireKey {
            return Err(ProvisionError::InvalidSpec(format!(
                "{}:{} is derived and must be provisioned as part of a batch",
                spec.resource_name, spec.key
            )));
        }
        let claimed = claim_resource(
            self.store.as_ref(),
            ResourceKind::Secret,
            &self.namespace,
            &spec.resource_name,
            &self.labels,
        )
        .await?;
        let mut resource = claimed.resource;
        let existing = resource.value(&spec.key);
        let rotate = force_overwrite
            && spec.kind == SecretKind::SigningKey
            && signing_key::must_rotate(existing);

        let outcome = if existing.is_some() && !rotate {
            if force_overwrite {
                tracing::warn!(
                    namespace = %self.namespace,
                    name = %spec.resource_name,
                    key = %spec.key,
                    kind = %spec.kind,
                    "value is not a signing key due for rotation, leaving it in place"
                );
            }
            if spec.kind == SecretKind::SigningKey {
                if let Some(Err(error)) = resource
                    .value_str(&spec.key)
                    .map(SigningKeyValue::parse)
                {
                    tracing::warn!(
                        name = %spec.resource_name,
                        key = %spec.key,
                        %error,
                        "existing signing key is not in the canonical format"
                    );
                }
            }
            SecretOutcome::Unchanged
        } else {
            let key_id = signing_key::next_key_id(existing);
            let value = generators::generate(spec.kind, key_id).map_err(|source| {
                ProvisionError::Generation {
                    name: spec.resource_name.clone(),
                    key: spec.key.clone(),
                    source,
                }
            })?;
            resource.data.insert(spec.key.clone(), value);
            if rotate {
                SecretOutcome::Rotated
            } else {
                SecretOutcome::Generated
            }
        };

        self.store.save(&resource).await?;
        tracing::info!(
            namespace = %self.namespace,
            name = %spec.resource_name,
            key = %spec.key,
            kind = %spec.kind,
            outcome = ?outcome,
            "secret provisioned"
        );
        Ok(outcome)
    }

    /// Rewrites the tombstone document under `spec.key` from the current
    /// signing keys and returns the keys that are due for rotation.
    async fn record_expired_keys(
        &self,
        spec: &GeneratedSecretSpec,
        declared: &BTreeMap<String, SecretKind>,
    ) -> ProvisionResult<Vec<String>> {
        let generation_error = |source| ProvisionError::Generation {
            name: spec.resource_name.clone(),
            key: spec.key.clone(),
            source,
        };
        let claimed = claim_resource(
            self.store.as_ref(),
            ResourceKind::Secret,
            &self.namespace,
            &spec.resource_name,
            &self.labels,
        )
        .await?;
        let mut resource = claimed.resource;

        let due = signing_key::keys_due_for_rotation(&resource.data, declared);
        let document =
            signing_key::compute_expired_keys(&resource.data, declared).map_err(generation_error)?;
        let encoded = document.to_yaml().map_err(generation_error)?;
        resource.data.insert(spec.key.clone(), encoded);
        self.store.save(&resource).await?;

        let outcome = SecretOutcome::ExpiredKeysRecorded {
            rotations: document.old_signing_keys.len(),
        };
        tracing::info!(
            namespace = %self.namespace,
            name = %spec.resource_name,
            key = %spec.key,
            due = ?due,
            outcome = ?outcome,
            "expired signing keys recorded"
        );
        Ok(due)
    }
}
