//! Reserved label names and the tool identity asserted through them.

use std::collections::BTreeMap;

use crate::error::{ProvisionError, ProvisionResult};

/// Standard label naming the tool that manages a resource.
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

pub const DEFAULT_TOOL_IDENTITY: &str = "matrix-tools";

const INIT_SECRETS_SUFFIX: &str = "init-secrets";
const DEPLOYMENT_MARKERS_SUFFIX: &str = "deployment-markers";

/// Prefix from which both managed-by values are derived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolIdentity(String);

impl ToolIdentity {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    pub fn init_secrets(&self) -> String {
        format!("{}-{}", self.0, INIT_SECRETS_SUFFIX)
    }

    pub fn deployment_markers(&self) -> String {
        format!("{}-{}", self.0, DEPLOYMENT_MARKERS_SUFFIX)
    }
}

impl Default for ToolIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_IDENTITY)
    }
}

/// Label set written onto every resource a component touches. Always carries
/// the managed-by value the component claims ownership with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedLabels {
    owner: String,
    labels: BTreeMap<String, String>,
}

impl ManagedLabels {
    pub fn new(owner: impl Into<String>, extra: BTreeMap<String, String>) -> Self {
        let owner = owner.into();
        let mut labels = extra;
        labels.insert(K8S_MANAGED_BY.to_string(), owner.clone());
        Self { owner, labels }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

/// Parses `key=value,key=value`. Empty input yields no labels.
pub fn parse_label_list(raw: &str) -> ProvisionResult<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| ProvisionError::InvalidSpec(format!("label `{entry}` is not key=value")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ProvisionError::InvalidSpec(format!("label `{entry}` has an empty key")));
        }
        labels.insert(key.to_string(), value.trim().to_string());
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_derives_both_owner_values() {
        let identity = ToolIdentity::default();
        assert_eq!(identity.init_secrets(), "matrix-tools-init-secrets");
        assert_eq!(identity.deployment_markers(), "matrix-tools-deployment-markers");
        assert_eq!(ToolIdentity::new("ess").init_secrets(), "ess-init-secrets");
    }

    #[test]
    fn managed_labels_override_a_caller_supplied_owner() {
        let mut extra = BTreeMap::new();
        extra.insert(K8S_MANAGED_BY.to_string(), "helm".to_string());
        extra.insert("app.kubernetes.io/name".to_string(), "synapse".to_string());
        let labels = ManagedLabels::new("matrix-tools-init-secrets", extra);
        assert_eq!(
            labels.as_map().get(K8S_MANAGED_BY).map(String::as_str),
            Some("matrix-tools-init-secrets")
        );
        assert_eq!(labels.as_map().len(), 2);
    }

    #[test]
    fn label_list_parsing() {
        let labels = parse_label_list("a=1, b = 2,,").expect("labels");
        assert_eq!(labels.get("a").map(String::as_str), Some("1"));
        assert_eq!(labels.get("b").map(String::as_str), Some("2"));
        assert!(parse_label_list("").expect("empty").is_empty());
        assert!(matches!(
            parse_label_list("novalue"),
            Err(ProvisionError::InvalidSpec(_))
        ));
    }
}
