//! [`ClusterApi`] backed by the Kubernetes API via `kube`

use crate::cluster::{
    ClusterApi, ClusterObject, HelmReleaseStatus, ObjectRef, helm_release_secret,
};
use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::read::GzDecoder;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::Deserialize;
use std::io::Read;

pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the text of a kubeconfig file
    pub async fn from_kubeconfig(kubeconfig: &str) -> Result<Self> {
        let kubeconfig = Kubeconfig::from_yaml(kubeconfig)
            .map_err(|e| ClusterError::Kubeconfig(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClusterError::Kubeconfig(e.to_string()))?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    fn dynamic_api(&self, target: &ObjectRef) -> (Api<DynamicObject>, ApiResource) {
        let gvk = GroupVersionKind::gvk(
            target.kind.group(),
            target.kind.version(),
            target.kind.kind(),
        );
        let resource = ApiResource::from_gvk_with_plural(&gvk, target.kind.plural());
        let api = Api::namespaced_with(self.client.clone(), &target.namespace, &resource);
        (api, resource)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(namespace).await?.is_some())
    }

    async fn deployment_ready(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let Some(deployment) = api.get_opt(name).await? else {
            return Ok(false);
        };

        let desired = deployment.spec.and_then(|spec| spec.replicas);
        let ready = deployment
            .status
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0);

        tracing::debug!(
            "Deployment {}/{}: {}/{} ready",
            namespace,
            name,
            ready,
            desired.map(|d| d.to_string()).unwrap_or_else(|| "?".to_string())
        );
        Ok(desired.is_some_and(|desired| ready == desired))
    }

    async fn object_exists(&self, target: &ObjectRef) -> Result<bool> {
        let (api, _) = self.dynamic_api(target);
        Ok(api.get_opt(&target.name).await?.is_some())
    }

    async fn create_object(&self, object: &ClusterObject) -> Result<()> {
        let (api, resource) = self.dynamic_api(&object.target);

        let mut dynamic = DynamicObject::new(&object.target.name, &resource)
            .within(&object.target.namespace)
            .data(object.content.clone());
        dynamic.metadata.labels = Some(object.labels.clone());

        api.create(&PostParams::default(), &dynamic).await?;
        Ok(())
    }

    async fn helm_release_status(
        &self,
        namespace: &str,
        release: &str,
    ) -> Result<HelmReleaseStatus> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret_name = helm_release_secret(release);

        let Some(secret) = api.get_opt(&secret_name).await? else {
            return Ok(HelmReleaseStatus::Unknown);
        };

        match secret.data.as_ref().and_then(|data| data.get("release")) {
            Some(payload) => decode_release_status(&payload.0),
            None => Ok(HelmReleaseStatus::Unknown),
        }
    }
}

#[derive(Deserialize)]
struct ReleaseRecord {
    #[serde(default)]
    info: ReleaseInfo,
}

#[derive(Deserialize, Default)]
struct ReleaseInfo {
    #[serde(default)]
    status: String,
}

/// Decode a Helm release record: base64, then gzip, then JSON
pub fn decode_release_status(payload: &[u8]) -> Result<HelmReleaseStatus> {
    let decode_err = |reason: String| ClusterError::Decode {
        what: "helm release".to_string(),
        reason,
    };

    let compressed = STANDARD
        .decode(payload)
        .map_err(|e| decode_err(e.to_string()))?;

    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| decode_err(e.to_string()))?;

    let record: ReleaseRecord =
        serde_json::from_slice(&json).map_err(|e| decode_err(e.to_string()))?;

    Ok(HelmReleaseStatus::from_status(&record.info.status))
}
