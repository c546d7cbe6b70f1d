use std::collections::BTreeMap;

use crate::error::{ProvisionError, ProvisionResult};
use crate::labels::{parse_label_list, ToolIdentity, DEFAULT_TOOL_IDENTITY};
use crate::markers::{MarkerSpec, MarkerStep};
use crate::secrets::{SecretBatch, DEFAULT_EXPIRED_KEYS_KEY};

/// Namespace every resource is read from and written to. Required.
pub const NAMESPACE_VAR: &str = "NAMESPACE";
/// Prefix for the managed-by label values. Defaults to `matrix-tools`.
pub const TOOL_IDENTITY_VAR: &str = "TOOL_IDENTITY";
/// Extra labels applied to every managed resource, as `key=value,...`.
pub const LABELS_VAR: &str = "LABELS";
/// Secrets to generate, as `name:key:kind[:argument],...`.
pub const GENERATED_SECRETS_VAR: &str = "GENERATED_SECRETS";
/// Data key holding the `old_signing_keys` document.
pub const EXPIRED_KEYS_KEY_VAR: &str = "EXPIRED_KEYS_KEY";
/// Markers to check or commit, as `name:key:newValue:allowed;allowed,...`.
pub const DEPLOYMENT_MARKERS_VAR: &str = "DEPLOYMENT_MARKERS";
/// `pre` or `post`.
pub const MARKER_STEP_VAR: &str = "MARKER_STEP";

#[derive(Clone, Debug)]
pub enum Command {
    GenerateSecrets(SecretBatch),
    DeploymentMarkers(Vec<MarkerSpec>),
}

#[derive(Clone, Debug)]
pub struct JobConfig {
    pub namespace: String,
    pub identity: ToolIdentity,
    pub labels: BTreeMap<String, String>,
    pub command: Command,
}

impl JobConfig {
    pub fn from_env(command: &str) -> ProvisionResult<Self> {
        Self::from_lookup(command, read_optional_env)
    }

    /// Builds the job configuration for `command`, validating every spec
    /// before any store is contacted.
    pub fn from_lookup<F>(command: &str, lookup: F) -> ProvisionResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup(NAMESPACE_VAR)
            .ok_or_else(|| ProvisionError::InvalidSpec(format!("${NAMESPACE_VAR} is not defined")))?;
        let identity =
            ToolIdentity::new(lookup(TOOL_IDENTITY_VAR).unwrap_or_else(|| DEFAULT_TOOL_IDENTITY.to_string()));
        let labels = parse_label_list(&lookup(LABELS_VAR).unwrap_or_default())?;

        let required = |name: &str| {
            lookup(name).ok_or_else(|| ProvisionError::InvalidSpec(format!("${name} is not defined")))
        };
        let command = match command {
            "generate-secrets" => {
                let expired_keys_key = lookup(EXPIRED_KEYS_KEY_VAR)
                    .unwrap_or_else(|| DEFAULT_EXPIRED_KEYS_KEY.to_string());
                Command::GenerateSecrets(SecretBatch::parse(
                    &required(GENERATED_SECRETS_VAR)?,
                    &expired_keys_key,
                )?)
            }
            "deployment-markers" => {
                let step: MarkerStep = required(MARKER_STEP_VAR)?.parse()?;
                Command::DeploymentMarkers(MarkerSpec::parse_list(
                    &required(DEPLOYMENT_MARKERS_VAR)?,
                    step,
                )?)
            }
            other => {
                return Err(ProvisionError::InvalidSpec(format!(
                    "unknown command `{other}`, expected generate-secrets or deployment-markers"
                )))
            }
        };

        Ok(Self {
            namespace,
            identity,
            labels,
            command,
        })
    }
}

fn read_optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn namespace_is_required() {
        let err = JobConfig::from_lookup(
            "generate-secrets",
            lookup(&[(GENERATED_SECRETS_VAR, "s:k:rand32")]),
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidSpec(_)));
    }

    #[test]
    fn generate_secrets_config() {
        let config = JobConfig::from_lookup(
            "generate-secrets",
            lookup(&[
                (NAMESPACE_VAR, "ess"),
                (LABELS_VAR, "app.kubernetes.io/part-of=matrix-stack"),
                (GENERATED_SECRETS_VAR, "synapse:SIGNING_KEY:signingkey"),
                (EXPIRED_KEYS_KEY_VAR, "OLD_KEYS"),
            ]),
        )
        .unwrap();
        assert_eq!(config.namespace, "ess");
        assert_eq!(config.identity.init_secrets(), "matrix-tools-init-secrets");
        assert_eq!(config.labels.len(), 1);
        let Command::GenerateSecrets(batch) = config.command else {
            panic!("expected generate-secrets");
        };
        assert!(batch.specs().iter().any(|spec| spec.key == "OLD_KEYS"));
    }

    #[test]
    fn deployment_markers_config() {
        let config = JobConfig::from_lookup(
            "deployment-markers",
            lookup(&[
                (NAMESPACE_VAR, "ess"),
                (TOOL_IDENTITY_VAR, "ess-tools"),
                (MARKER_STEP_VAR, "post"),
                (DEPLOYMENT_MARKERS_VAR, "markers:MAS:delegated:legacy"),
            ]),
        )
        .unwrap();
        assert_eq!(config.identity.deployment_markers(), "ess-tools-deployment-markers");
        let Command::DeploymentMarkers(markers) = config.command else {
            panic!("expected deployment-markers");
        };
        assert_eq!(markers[0].step, MarkerStep::Post);
    }

    #[test]
    fn unknown_tokens_fail_before_any_store_call() {
        let err = JobConfig::from_lookup(
            "deployment-markers",
            lookup(&[
                (NAMESPACE_VAR, "ess"),
                (MARKER_STEP_VAR, "mid"),
                (DEPLOYMENT_MARKERS_VAR, "markers:MAS:delegated:legacy"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::UnknownStep(_)));

        let err = JobConfig::from_lookup(
            "generate-secrets",
            lookup(&[(NAMESPACE_VAR, "ess"), (GENERATED_SECRETS_VAR, "s:k:uuid")]),
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::UnknownKind(_)));

        let err = JobConfig::from_lookup("render-config", lookup(&[(NAMESPACE_VAR, "ess")]))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidSpec(_)));
    }
}
