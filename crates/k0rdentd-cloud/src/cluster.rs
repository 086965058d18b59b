//! Cluster API abstraction
//!
//! Everything k0rdentd needs from the Kubernetes API goes through
//! [`ClusterApi`], so the installer and provisioner can run against an
//! in-memory cluster in tests.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Object kinds k0rdentd creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Secret,
    AwsClusterStaticIdentity,
    AzureClusterIdentity,
    Credential,
}

impl ObjectKind {
    pub fn group(&self) -> &'static str {
        match self {
            ObjectKind::Secret => "",
            ObjectKind::AwsClusterStaticIdentity | ObjectKind::AzureClusterIdentity => {
                "infrastructure.cluster.x-k8s.io"
            }
            ObjectKind::Credential => "k0rdent.mirantis.com",
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            ObjectKind::Secret => "v1",
            ObjectKind::AwsClusterStaticIdentity => "v1beta2",
            ObjectKind::AzureClusterIdentity => "v1beta1",
            ObjectKind::Credential => "v1beta1",
        }
    }

    pub fn api_version(&self) -> String {
        match self.group() {
            "" => self.version().to_string(),
            group => format!("{}/{}", group, self.version()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ObjectKind::Secret => "Secret",
            ObjectKind::AwsClusterStaticIdentity => "AWSClusterStaticIdentity",
            ObjectKind::AzureClusterIdentity => "AzureClusterIdentity",
            ObjectKind::Credential => "Credential",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ObjectKind::Secret => "secrets",
            ObjectKind::AwsClusterStaticIdentity => "awsclusterstaticidentities",
            ObjectKind::AzureClusterIdentity => "azureclusteridentities",
            ObjectKind::Credential => "credentials",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// A namespaced object a cluster object is addressed by
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// An object to create
///
/// `content` holds the top-level fields besides apiVersion/kind/metadata,
/// e.g. `{"spec": {...}}` or `{"type": "Opaque", "stringData": {...}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterObject {
    pub target: ObjectRef,
    pub labels: BTreeMap<String, String>,
    pub content: Value,
}

impl ClusterObject {
    /// Full manifest as sent to the API server
    pub fn manifest(&self) -> Value {
        let mut manifest = serde_json::json!({
            "apiVersion": self.target.kind.api_version(),
            "kind": self.target.kind.kind(),
            "metadata": {
                "name": self.target.name,
                "namespace": self.target.namespace,
                "labels": self.labels,
            },
        });
        if let (Some(manifest), Some(content)) = (manifest.as_object_mut(), self.content.as_object())
        {
            for (key, value) in content {
                manifest.insert(key.clone(), value.clone());
            }
        }
        manifest
    }
}

/// Status of a Helm release, read from its release secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelmReleaseStatus {
    Deployed,
    Failed,
    Pending,
    /// No release secret, or a status k0rdentd does not act on
    Unknown,
}

impl HelmReleaseStatus {
    pub fn from_status(status: &str) -> Self {
        if status.contains("deployed") {
            HelmReleaseStatus::Deployed
        } else if status.contains("failed") {
            HelmReleaseStatus::Failed
        } else if status.contains("pending") {
            HelmReleaseStatus::Pending
        } else {
            HelmReleaseStatus::Unknown
        }
    }
}

/// Kubernetes API surface used by k0rdentd
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    /// Ready replicas equal desired replicas; a missing deployment or
    /// unset desired count is not ready
    async fn deployment_ready(&self, namespace: &str, name: &str) -> Result<bool>;

    /// `Ok(false)` or `Err(ClusterError::NotFound)` both mean absent
    async fn object_exists(&self, target: &ObjectRef) -> Result<bool>;

    async fn create_object(&self, object: &ClusterObject) -> Result<()>;

    async fn helm_release_status(&self, namespace: &str, release: &str)
    -> Result<HelmReleaseStatus>;
}

/// Name of the secret Helm stores the first revision of `release` in
pub fn helm_release_secret(release: &str) -> String {
    format!("sh.helm.release.v1.{}.v1", release)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_versions() {
        assert_eq!(ObjectKind::Secret.api_version(), "v1");
        assert_eq!(
            ObjectKind::AwsClusterStaticIdentity.api_version(),
            "infrastructure.cluster.x-k8s.io/v1beta2"
        );
        assert_eq!(
            ObjectKind::AzureClusterIdentity.api_version(),
            "infrastructure.cluster.x-k8s.io/v1beta1"
        );
        assert_eq!(
            ObjectKind::Credential.api_version(),
            "k0rdent.mirantis.com/v1beta1"
        );
    }

    #[test]
    fn test_manifest_merges_content() {
        let object = ClusterObject {
            target: ObjectRef::new(ObjectKind::Credential, "kcm-system", "aws"),
            labels: BTreeMap::from([("a".to_string(), "b".to_string())]),
            content: serde_json::json!({"spec": {"description": "d"}}),
        };
        let manifest = object.manifest();
        assert_eq!(manifest["apiVersion"], "k0rdent.mirantis.com/v1beta1");
        assert_eq!(manifest["kind"], "Credential");
        assert_eq!(manifest["metadata"]["labels"]["a"], "b");
        assert_eq!(manifest["spec"]["description"], "d");
    }

    #[test]
    fn test_helm_status_parsing() {
        assert_eq!(
            HelmReleaseStatus::from_status("deployed"),
            HelmReleaseStatus::Deployed
        );
        assert_eq!(
            HelmReleaseStatus::from_status("pending-install"),
            HelmReleaseStatus::Pending
        );
        assert_eq!(
            HelmReleaseStatus::from_status("failed"),
            HelmReleaseStatus::Failed
        );
        assert_eq!(
            HelmReleaseStatus::from_status("superseded"),
            HelmReleaseStatus::Unknown
        );
        assert_eq!(
            helm_release_secret("cluster-api-provider-aws"),
            "sh.helm.release.v1.cluster-api-provider-aws.v1"
        );
    }
}
