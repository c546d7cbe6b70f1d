//! Step-gated deployment markers.
//!
//! A marker records the value a configuration dimension held as of the last
//! successful `post` step. `pre` blocks a rollout whose recorded value is not
//! one the new release can transition from.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ProvisionError, ProvisionResult};
use crate::labels::{ManagedLabels, ToolIdentity};
use crate::ownership::claim_resource;
use crate::store::{ResourceKind, ResourceStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerStep {
    Pre,
    Post,
}

impl MarkerStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerStep::Pre => "pre",
            MarkerStep::Post => "post",
        }
    }
}

impl FromStr for MarkerStep {
    type Err = ProvisionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pre" => Ok(MarkerStep::Pre),
            "post" => Ok(MarkerStep::Post),
            other => Err(ProvisionError::UnknownStep(other.to_string())),
        }
    }
}

impl fmt::Display for MarkerStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkerSpec {
    pub resource_name: String,
    pub key: String,
    pub step: MarkerStep,
    pub new_value: String,
    pub allowed_values: BTreeSet<String>,
}

impl MarkerSpec {
    /// `name:key:newValue[:allowed;allowed;...]`
    pub fn parse(raw: &str, step: MarkerStep) -> ProvisionResult<Self> {
        let parts: Vec<&str> = raw.trim().split(':').collect();
        let (name, key, new_value, allowed) = match parts.as_slice() {
            [name, key, new_value] => (*name, *key, *new_value, ""),
            [name, key, new_value, allowed] => (*name, *key, *new_value, *allowed),
            _ => {
                return Err(ProvisionError::InvalidSpec(format!(
                    "expected <name:key:newValue:[allowedValues;..]>, got `{raw}`"
                )))
            }
        };
        if name.is_empty() || key.is_empty() {
            return Err(ProvisionError::InvalidSpec(format!(
                "marker name and key must be set in `{raw}`"
            )));
        }
        Ok(Self {
            resource_name: name.to_string(),
            key: key.to_string(),
            step,
            new_value: new_value.to_string(),
            allowed_values: allowed
                .split(';')
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    /// Comma-separated list of markers sharing one step.
    pub fn parse_list(raw: &str, step: MarkerStep) -> ProvisionResult<Vec<Self>> {
        let markers = raw
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| Self::parse(entry, step))
            .collect::<ProvisionResult<Vec<_>>>()?;
        if markers.is_empty() {
            return Err(ProvisionError::InvalidSpec("no deployment markers given".into()));
        }
        Ok(markers)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkerOutcome {
    /// `pre` found no recorded value or an allowed one.
    Accepted { current: Option<String> },
    /// `post` wrote the new value.
    Committed { previous: Option<String> },
}

pub struct MarkerGuard {
    store: Arc<dyn ResourceStore>,
    namespace: String,
    labels: ManagedLabels,
}

impl MarkerGuard {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        namespace: impl Into<String>,
        identity: &ToolIdentity,
        extra_labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            labels: ManagedLabels::new(identity.deployment_markers(), extra_labels),
        }
    }

    pub async fn apply_all(&self, markers: &[MarkerSpec]) -> ProvisionResult<Vec<MarkerOutcome>> {
        let mut outcomes = Vec::with_capacity(markers.len());
        for marker in markers {
            outcomes.push(self.apply(marker).await?);
        }
        Ok(outcomes)
    }

    pub async fn apply(&self, marker: &MarkerSpec) -> ProvisionResult<MarkerOutcome> {
        let claimed = claim_resource(
            self.store.as_ref(),
            ResourceKind::Marker,
            &self.namespace,
            &marker.resource_name,
            &self.labels,
        )
        .await?;
        let mut resource = claimed.resource;
        let current = resource
            .value(&marker.key)
            .map(|value| String::from_utf8_lossy(value).into_owned());

        match marker.step {
            MarkerStep::Pre => {
                if let Some(current) = current.as_deref() {
                    if !marker.allowed_values.contains(current) {
                        tracing::error!(
                            namespace = %self.namespace,
                            name = %marker.resource_name,
                            key = %marker.key,
                            %current,
                            new_value = %marker.new_value,
                            "marker blocks the transition"
                        );
                        return Err(ProvisionError::PreconditionViolation {
                            key: marker.key.clone(),
                            current: current.to_string(),
                            new_value: marker.new_value.clone(),
                            allowed: marker.allowed_values.iter().cloned().collect(),
                        });
                    }
                }
                if claimed.labels_changed {
                    self.store.save(&resource).await?;
                }
                tracing::info!(
                    namespace = %self.namespace,
                    name = %marker.resource_name,
                    key = %marker.key,
                    current = ?current,
                    "marker allows the transition"
                );
                Ok(MarkerOutcome::Accepted { current })
            }
            MarkerStep::Post => {
                resource
                    .data
                    .insert(marker.key.clone(), marker.new_value.clone().into_bytes());
                self.store.save(&resource).await?;
                tracing::info!(
                    namespace = %self.namespace,
                    name = %marker.resource_name,
                    key = %marker.key,
                    previous = ?current,
                    value = %marker.new_value,
                    "marker committed"
                );
                Ok(MarkerOutcome::Committed { previous: current })
            }
        }
    }
}
