//! Cloud credential provisioning
//!
//! Every credential becomes up to three cluster objects:
//!
//! ```text
//!   <name>-secret    Secret holding the secret material
//!   <name>-identity  provider identity (AWS/Azure only)
//!   <name>           k0rdent Credential referencing the identity,
//!                    or the Secret directly for OpenStack
//! ```
//!
//! The objects are created in that order with [`ensure`]. A failed secret
//! aborts the credential; identity and credential failures are warnings.

use crate::cluster::{ClusterApi, ClusterObject, ObjectKind, ObjectRef};
use crate::error::CredentialError;
use crate::provision::{Ensured, ensure};
use k0rdentd_config::{
    AwsCredential, AzureCredential, CredentialDefinition, OpenStackCredential, Provider,
};
use serde_json::{Value, json};
use serde_yaml::Mapping;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const CREDENTIAL_NAMESPACE: &str = "kcm-system";
pub const COMPONENT_LABEL: &str = "k0rdent.mirantis.com/component";
pub const COMPONENT_VALUE: &str = "kcm";
pub const MOVE_HIERARCHY_LABEL: &str = "clusterctl.cluster.x-k8s.io/move-hierarchy";

/// The objects one credential expands to
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialObjects {
    pub secret: ClusterObject,
    pub identity: Option<ClusterObject>,
    pub credential: ClusterObject,
}

impl CredentialObjects {
    pub fn build(
        definition: &CredentialDefinition,
        namespace: &str,
    ) -> Result<Self, CredentialError> {
        let secret_ref = ObjectRef::new(ObjectKind::Secret, namespace, definition.secret_name());

        let (secret_data, identity) = match definition {
            CredentialDefinition::Aws(cred) => (
                aws_secret_data(cred),
                Some(aws_identity(definition, namespace)),
            ),
            CredentialDefinition::Azure(cred) => (
                BTreeMap::from([("clientSecret".to_string(), cred.client_secret.clone())]),
                Some(azure_identity(definition, cred, namespace)),
            ),
            CredentialDefinition::OpenStack(cred) => (
                BTreeMap::from([("clouds.yaml".to_string(), clouds_yaml(cred)?)]),
                None,
            ),
        };

        let secret = ClusterObject {
            target: secret_ref.clone(),
            labels: component_labels(),
            content: json!({ "type": "Opaque", "stringData": secret_data }),
        };

        // OpenStack has no identity object; its Credential points at the Secret
        let identity_ref = identity
            .as_ref()
            .map(|identity| identity.target.clone())
            .unwrap_or(secret_ref);

        let credential = ClusterObject {
            target: ObjectRef::new(ObjectKind::Credential, namespace, definition.name()),
            labels: component_labels(),
            content: json!({
                "spec": {
                    "description": definition.description(),
                    "identityRef": {
                        "apiVersion": identity_ref.kind.api_version(),
                        "kind": identity_ref.kind.kind(),
                        "name": identity_ref.name,
                        "namespace": identity_ref.namespace,
                    },
                },
            }),
        };

        Ok(Self {
            secret,
            identity,
            credential,
        })
    }

    fn targets(&self) -> Vec<&ObjectRef> {
        std::iter::once(&self.secret.target)
            .chain(self.identity.as_ref().map(|i| &i.target))
            .chain(std::iter::once(&self.credential.target))
            .collect()
    }
}

fn component_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(COMPONENT_LABEL.to_string(), COMPONENT_VALUE.to_string())])
}

fn aws_secret_data(cred: &AwsCredential) -> BTreeMap<String, String> {
    let mut data = BTreeMap::from([
        ("AccessKeyID".to_string(), cred.access_key_id.clone()),
        ("SecretAccessKey".to_string(), cred.secret_access_key.clone()),
    ]);
    if let Some(token) = cred.session_token.as_ref().filter(|t| !t.is_empty()) {
        data.insert("SessionToken".to_string(), token.clone());
    }
    data
}

fn aws_identity(definition: &CredentialDefinition, namespace: &str) -> ClusterObject {
    ClusterObject {
        target: ObjectRef::new(
            ObjectKind::AwsClusterStaticIdentity,
            namespace,
            definition.identity_name(),
        ),
        labels: component_labels(),
        content: json!({
            "spec": {
                "secretRef": definition.secret_name(),
                "allowedNamespaces": { "selector": { "matchLabels": {} } },
            },
        }),
    }
}

fn azure_identity(
    definition: &CredentialDefinition,
    cred: &AzureCredential,
    namespace: &str,
) -> ClusterObject {
    let mut labels = component_labels();
    labels.insert(MOVE_HIERARCHY_LABEL.to_string(), "true".to_string());

    ClusterObject {
        target: ObjectRef::new(
            ObjectKind::AzureClusterIdentity,
            namespace,
            definition.identity_name(),
        ),
        labels,
        content: json!({
            "spec": {
                "type": "ServicePrincipal",
                "clientID": cred.client_id,
                "tenantID": cred.tenant_id,
                "allowedNamespaces": {},
                "clientSecret": {
                    "name": definition.secret_name(),
                    "namespace": namespace,
                },
            },
        }),
    }
}

/// Render the `clouds.yaml` document for an OpenStack credential
pub fn clouds_yaml(cred: &OpenStackCredential) -> Result<String, CredentialError> {
    let mut auth = Mapping::new();
    auth.insert("auth_url".into(), cred.auth_url.as_str().into());

    let mut cloud = Mapping::new();
    if let Some((id, secret)) = cred.application_credential() {
        auth.insert("application_credential_id".into(), id.into());
        auth.insert("application_credential_secret".into(), secret.into());
        cloud.insert("auth".into(), auth.into());
        cloud.insert("auth_type".into(), "v3applicationcredential".into());
    } else {
        for (key, value) in [
            ("username", &cred.username),
            ("password", &cred.password),
            ("project_name", &cred.project_name),
            ("domain_name", &cred.domain_name),
        ] {
            auth.insert(key.into(), value.as_deref().unwrap_or_default().into());
        }
        cloud.insert("auth".into(), auth.into());
    }
    cloud.insert("region_name".into(), cred.region.as_str().into());
    cloud.insert("interface".into(), "public".into());
    cloud.insert("identity_api_version".into(), 3.into());

    let mut clouds = Mapping::new();
    clouds.insert("openstack".into(), cloud.into());
    let mut root = Mapping::new();
    root.insert("clouds".into(), clouds.into());

    Ok(serde_yaml::to_string(&root)?)
}

/// What happened to one credential
#[derive(Debug)]
pub enum CredentialStatus {
    /// Every object already existed; nothing was attempted
    Skipped,
    Provisioned {
        created: Vec<ObjectRef>,
        warnings: Vec<String>,
    },
    Failed(CredentialError),
}

#[derive(Debug)]
pub struct CredentialOutcome {
    pub provider: Provider,
    pub name: String,
    pub status: CredentialStatus,
}

/// Result of [`CredentialsManager::create_all`]
#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub outcomes: Vec<CredentialOutcome>,
}

impl ProvisionReport {
    pub fn created(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match &o.status {
                CredentialStatus::Provisioned { created, .. } => created.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn warnings(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .flat_map(|o| match &o.status {
                CredentialStatus::Provisioned { warnings, .. } => {
                    warnings.iter().map(String::as_str).collect::<Vec<_>>()
                }
                _ => Vec::new(),
            })
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.warnings().is_empty()
            && !self
                .outcomes
                .iter()
                .any(|o| matches!(o.status, CredentialStatus::Failed(_)))
    }

    /// Aggregate error for every credential whose secret could not be created
    pub fn into_result(self) -> Result<(), CredentialError> {
        let failed: Vec<CredentialError> = self
            .outcomes
            .into_iter()
            .filter_map(|o| match o.status {
                CredentialStatus::Failed(e) => Some(e),
                _ => None,
            })
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(CredentialError::Failed(failed))
        }
    }
}

/// Creates the cluster objects for configured cloud credentials
pub struct CredentialsManager {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
}

impl CredentialsManager {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            namespace: CREDENTIAL_NAMESPACE.to_string(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Provision every credential, in the order given
    ///
    /// Credentials whose objects all exist are skipped without any create
    /// call. A failing credential does not stop the others.
    pub async fn create_all(&self, definitions: &[CredentialDefinition]) -> ProvisionReport {
        let mut report = ProvisionReport::default();

        for definition in definitions {
            let status = match CredentialObjects::build(definition, &self.namespace) {
                Ok(objects) => self.provision(definition, &objects).await,
                Err(e) => CredentialStatus::Failed(e),
            };

            if let CredentialStatus::Failed(e) = &status {
                tracing::warn!("{}", e);
            }

            report.outcomes.push(CredentialOutcome {
                provider: definition.provider(),
                name: definition.name().to_string(),
                status,
            });
        }

        report
    }

    async fn all_exist(&self, objects: &CredentialObjects) -> bool {
        for target in objects.targets() {
            match self.cluster.object_exists(target).await {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    tracing::debug!("Pre-check for {} failed: {}", target, e);
                    return false;
                }
            }
        }
        true
    }

    async fn ensure_object(
        &self,
        object: &ClusterObject,
    ) -> Result<Ensured, crate::error::ProvisionError> {
        ensure(
            &object.target,
            || self.cluster.object_exists(&object.target),
            || self.cluster.create_object(object),
        )
        .await
    }

    async fn provision(
        &self,
        definition: &CredentialDefinition,
        objects: &CredentialObjects,
    ) -> CredentialStatus {
        let provider = definition.provider();
        let name = definition.name();

        if self.all_exist(objects).await {
            tracing::info!("{} credential {} already exists, skipping", provider, name);
            return CredentialStatus::Skipped;
        }

        tracing::debug!("Creating {} credential {}", provider, name);
        let mut created = Vec::new();
        let mut warnings = Vec::new();

        match self.ensure_object(&objects.secret).await {
            Ok(Ensured::Created) => created.push(objects.secret.target.clone()),
            Ok(Ensured::AlreadyPresent) => {}
            Err(source) => {
                return CredentialStatus::Failed(CredentialError::Secret {
                    provider: provider.to_string(),
                    name: name.to_string(),
                    source,
                });
            }
        }

        for object in objects.identity.iter().chain(std::iter::once(&objects.credential)) {
            match self.ensure_object(object).await {
                Ok(Ensured::Created) => created.push(object.target.clone()),
                Ok(Ensured::AlreadyPresent) => {}
                Err(e) => {
                    tracing::warn!("{} (continuing with best effort)", e);
                    warnings.push(e.to_string());
                }
            }
        }

        CredentialStatus::Provisioned { created, warnings }
    }
}

/// Non-secret summary of a definition, for dry-run output
pub fn describe(definition: &CredentialDefinition) -> Value {
    json!({
        "provider": definition.provider().to_string(),
        "name": definition.name(),
        "secret": definition.secret_name(),
        "identity": match definition {
            CredentialDefinition::OpenStack(_) => Value::Null,
            _ => Value::String(definition.identity_name()),
        },
        "description": definition.description(),
    })
}
