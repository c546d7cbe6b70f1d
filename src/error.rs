use thiserror::Error;

use crate::generators::GenerationError;
use crate::store::{ResourceKind, StoreError};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{kind} {namespace}/{name} is not managed by {expected} (managed-by: {})", .found.as_deref().unwrap_or("<unset>"))]
    OwnershipConflict {
        kind: ResourceKind,
        namespace: String,
        name: String,
        expected: String,
        found: Option<String>,
    },
    #[error("unknown secret kind: {0}")]
    UnknownKind(String),
    #[error("unknown marker step: {0}")]
    UnknownStep(String),
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
    #[error("failed to generate {name}:{key}: {source}")]
    Generation {
        name: String,
        key: String,
        #[source]
        source: GenerationError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{key} marker prevented transitioning to value {new_value} from value {current} because it is not in the allowed values: {}", .allowed.join(", "))]
    PreconditionViolation {
        key: String,
        current: String,
        new_value: String,
        allowed: Vec<String>,
    },
}

impl ProvisionError {
    /// Conflicts are safe to retry by re-running the whole job.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProvisionError::Store(StoreError::Conflict { .. }))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::UnknownKind(_)
            | ProvisionError::UnknownStep(_)
            | ProvisionError::InvalidSpec(_) => 2,
            ProvisionError::PreconditionViolation { .. } => 3,
            err if err.is_retryable() => 75,
            _ => 1,
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_the_only_retryable_errors() {
        let conflict = ProvisionError::Store(StoreError::Conflict {
            kind: ResourceKind::Secret,
            namespace: "ns".into(),
            name: "s".into(),
        });
        assert!(conflict.is_retryable());
        assert_eq!(conflict.exit_code(), 75);

        let precondition = ProvisionError::PreconditionViolation {
            key: "k".into(),
            current: "v1".into(),
            new_value: "v3".into(),
            allowed: vec!["v2".into(), "v3".into()],
        };
        assert!(!precondition.is_retryable());
        assert_eq!(precondition.exit_code(), 3);
        assert_eq!(
            precondition.to_string(),
            "k marker prevented transitioning to value v3 from value v1 because it is not in the allowed values: v2, v3"
        );
    }

    #[test]
    fn ownership_conflict_names_the_resource() {
        let err = ProvisionError::OwnershipConflict {
            kind: ResourceKind::Marker,
            namespace: "ns".into(),
            name: "markers".into(),
            expected: "matrix-tools-deployment-markers".into(),
            found: None,
        };
        assert_eq!(
            err.to_string(),
            "configmap ns/markers is not managed by matrix-tools-deployment-markers (managed-by: <unset>)"
        );
        assert_eq!(err.exit_code(), 1);
    }
}
