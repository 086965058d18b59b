//! k0s cluster configuration generation
//!
//! The generated document installs k0rdent through the k0s Helm extension.
//! Air-gapped installs point the chart and every image at the local registry.

use crate::error::Result;
use k0rdentd_airgap::CHART_NAME;
use k0rdentd_config::InstallationConfig;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

const API_VERSION: &str = "k0s.k0sproject.io/v1beta1";
const KIND: &str = "Cluster";
const CLUSTER_NAME: &str = "k0s";
const RELEASE_NAME: &str = "k0rdent";
const PUBLIC_REPOSITORY: &str = "https://charts.k0rdent.io";
const LOCAL_REPOSITORY: &str = "local-registry";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterConfig {
    api_version: &'static str,
    kind: &'static str,
    metadata: Metadata,
    spec: ClusterSpec,
}

#[derive(Debug, Serialize)]
struct Metadata {
    name: &'static str,
}

#[derive(Debug, Serialize)]
struct ClusterSpec {
    api: ApiSpec,
    network: NetworkSpec,
    storage: StorageSpec,
    extensions: Extensions,
}

#[derive(Debug, Serialize)]
struct ApiSpec {
    address: String,
    port: u16,
}

#[derive(Debug, Serialize)]
struct NetworkSpec {
    provider: String,
    #[serde(rename = "podCIDR")]
    pod_cidr: String,
    #[serde(rename = "serviceCIDR")]
    service_cidr: String,
}

#[derive(Debug, Serialize)]
struct StorageSpec {
    #[serde(rename = "type")]
    kind: String,
    etcd: EtcdSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EtcdSpec {
    peer_address: String,
}

#[derive(Debug, Serialize)]
struct Extensions {
    helm: HelmExtension,
}

#[derive(Debug, Serialize)]
struct HelmExtension {
    repositories: Vec<Repository>,
    charts: Vec<Chart>,
}

#[derive(Debug, Serialize)]
struct Repository {
    name: &'static str,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    insecure: Option<bool>,
}

#[derive(Debug, Serialize)]
struct Chart {
    name: &'static str,
    chartname: String,
    version: String,
    namespace: String,
    /// Helm values as an embedded YAML document
    values: String,
}

/// Render the k0s configuration for an online install
pub fn generate(config: &InstallationConfig) -> Result<String> {
    let repository = Repository {
        name: RELEASE_NAME,
        url: PUBLIC_REPOSITORY.to_string(),
        insecure: None,
    };
    let chart = Chart {
        name: RELEASE_NAME,
        chartname: config.k0rdent.helm.chart.clone(),
        version: config.k0rdent.version.clone(),
        namespace: config.k0rdent.helm.namespace.clone(),
        values: format_values(&config.k0rdent.helm.values)?,
    };
    render(config, repository, chart)
}

/// Render the k0s configuration for an air-gapped install
///
/// The chart comes from `oci://<registry>/charts`. Generated image overrides
/// are merged under the configured values, so user values win.
pub fn generate_airgap(config: &InstallationConfig, registry: &str, insecure: bool) -> Result<String> {
    let mut values = Value::Mapping(airgap_values(registry, insecure)?);
    deep_merge(&mut values, Value::Mapping(config.k0rdent.helm.values.clone()));
    let values = match values {
        Value::Mapping(mapping) => mapping,
        _ => Mapping::new(),
    };

    let repository = Repository {
        name: LOCAL_REPOSITORY,
        url: format!("oci://{}/charts", registry),
        insecure: Some(insecure),
    };
    let chart = Chart {
        name: RELEASE_NAME,
        chartname: format!("oci://{}/charts/{}", registry, CHART_NAME),
        version: config.k0rdent.version.clone(),
        namespace: config.k0rdent.helm.namespace.clone(),
        values: format_values(&values)?,
    };
    render(config, repository, chart)
}

fn render(config: &InstallationConfig, repository: Repository, chart: Chart) -> Result<String> {
    let k0s = &config.k0s;
    let document = ClusterConfig {
        api_version: API_VERSION,
        kind: KIND,
        metadata: Metadata { name: CLUSTER_NAME },
        spec: ClusterSpec {
            api: ApiSpec {
                address: k0s.api.address.clone(),
                port: k0s.api.port,
            },
            network: NetworkSpec {
                provider: k0s.network.provider.clone(),
                pod_cidr: k0s.network.pod_cidr.clone(),
                service_cidr: k0s.network.service_cidr.clone(),
            },
            storage: StorageSpec {
                kind: k0s.storage.kind.clone(),
                etcd: EtcdSpec {
                    peer_address: k0s.storage.etcd.peer_address.clone(),
                },
            },
            extensions: Extensions {
                helm: HelmExtension {
                    repositories: vec![repository],
                    charts: vec![chart],
                },
            },
        },
    };
    Ok(serde_yaml::to_string(&document)?)
}

fn format_values(values: &Mapping) -> Result<String> {
    if values.is_empty() {
        return Ok(String::new());
    }
    Ok(serde_yaml::to_string(values)?)
}

/// Image overrides pointing every k0rdent component at `registry`
pub fn airgap_values(registry: &str, insecure: bool) -> Result<Mapping> {
    let document = format!(
        r#"
global:
  registry: {registry}
  imageRegistry: {registry}
cert-manager:
  image:
    repository: {registry}/jetstack/cert-manager-controller
  webhook:
    image:
      repository: {registry}/jetstack/cert-manager-webhook
  cainjector:
    image:
      repository: {registry}/jetstack/cert-manager-cainjector
  startupapicheck:
    image:
      repository: {registry}/jetstack/cert-manager-startupapicheck
controller:
  templatesRepoURL: oci://{registry}/charts
  globalRegistry: {registry}
  insecureRegistry: {insecure}
  enableTelemetry: false
regional-telemetry:
  enabled: false
"#
    );
    Ok(serde_yaml::from_str(&document)?)
}

/// Merge `overlay` into `base`; nested mappings merge, anything else replaces
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
