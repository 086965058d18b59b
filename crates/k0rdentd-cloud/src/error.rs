//! Cluster access and provisioning error types

use thiserror::Error;

/// Errors returned by a [`crate::ClusterApi`] implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 409 => {
                ClusterError::AlreadyExists(resp.message.clone())
            }
            _ => ClusterError::Api(err.to_string()),
        }
    }
}

/// Errors from a single [`crate::ensure`] call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("failed to check whether {kind} {namespace}/{name} exists: {source}")]
    ExistenceCheck {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to create {kind} {namespace}/{name}: {source}")]
    Create {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: ClusterError,
    },
}

/// Credential provisioning failures
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("failed to create {provider} credential {name}: {source}")]
    Secret {
        provider: String,
        name: String,
        #[source]
        source: ProvisionError,
    },

    #[error("failed to create {} credential(s): {}", .0.len(), .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Failed(Vec<CredentialError>),

    #[error("failed to render clouds.yaml: {0}")]
    Render(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
