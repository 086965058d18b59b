//! k0rdentd configuration
//!
//! The installation configuration is a YAML document with a `k0s` section
//! (runtime network, API and storage settings), a `k0rdent` section (chart,
//! namespace, values and cloud credentials) and an optional `airgap` section.
//!
//! Loading follows a fixed fallback chain:
//! 1. an explicitly given path (any failure is fatal)
//! 2. [`DEFAULT_CONFIG_PATH`] when it exists and is non-empty
//! 3. the built-in defaults

pub mod credentials;
pub mod error;

pub use credentials::*;
pub use error::*;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Default location of the k0rdentd configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/k0rdentd/k0rdentd.yaml";

pub const DEFAULT_K0RDENT_VERSION: &str = "1.2.2";
pub const DEFAULT_CHART: &str =
    "oci://registry.mirantis.com/k0rdent-enterprise/charts/k0rdent-enterprise";
pub const DEFAULT_NAMESPACE: &str = "kcm-system";
pub const DEFAULT_REGISTRY_ADDRESS: &str = "localhost:5000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallationConfig {
    pub k0s: K0sConfig,
    pub k0rdent: K0rdentConfig,
    #[serde(skip_serializing_if = "AirgapConfig::is_unset")]
    pub airgap: AirgapConfig,
    pub debug: bool,
    pub log_level: String,
}

impl Default for InstallationConfig {
    fn default() -> Self {
        Self {
            k0s: K0sConfig::default(),
            k0rdent: K0rdentConfig::default(),
            airgap: AirgapConfig::default(),
            debug: false,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct K0sConfig {
    /// Empty means whatever version the k0s installer resolves
    pub version: String,
    pub api: ApiConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 6443,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub provider: String,
    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,
    #[serde(rename = "serviceCIDR")]
    pub service_cidr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            provider: "calico".to_string(),
            pod_cidr: "10.244.0.0/16".to_string(),
            service_cidr: "10.96.0.0/12".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub etcd: EtcdConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: "etcd".to_string(),
            etcd: EtcdConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EtcdConfig {
    pub peer_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct K0rdentConfig {
    pub version: String,
    pub helm: HelmConfig,
    #[serde(skip_serializing_if = "CredentialsConfig::is_empty")]
    pub credentials: CredentialsConfig,
}

impl Default for K0rdentConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_K0RDENT_VERSION.to_string(),
            helm: HelmConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    pub chart: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Mapping::is_empty")]
    pub values: Mapping,
}

impl Default for HelmConfig {
    fn default() -> Self {
        let mut ui = Mapping::new();
        ui.insert("enabled".into(), Value::Bool(true));

        let mut values = Mapping::new();
        values.insert("replicaCount".into(), Value::Number(1.into()));
        values.insert("k0rdent-ui".into(), Value::Mapping(ui));

        Self {
            chart: DEFAULT_CHART.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            values,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AirgapConfig {
    pub bundle_path: Option<PathBuf>,
    pub registry: RegistryConfig,
}

impl AirgapConfig {
    fn is_unset(&self) -> bool {
        self == &AirgapConfig::default()
    }

    /// Local registry address, `localhost:5000` unless configured
    pub fn registry_address(&self) -> &str {
        if self.registry.address.is_empty() {
            DEFAULT_REGISTRY_ADDRESS
        } else {
            &self.registry.address
        }
    }

    /// Loopback registries on the default port are always reached over plain HTTP
    pub fn registry_insecure(&self) -> bool {
        matches!(
            self.registry.address.as_str(),
            "" | "localhost:5000" | "127.0.0.1:5000"
        ) || self.registry.insecure
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub address: String,
    pub insecure: bool,
}

/// Overrides applied from the command line before any installation phase runs
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub k0s_version: Option<String>,
    pub k0rdent_version: Option<String>,
    pub debug: bool,
}

impl InstallationConfig {
    /// Parse a configuration document
    pub fn from_yaml(path: &Path, content: &str) -> Result<Self> {
        let mut config: InstallationConfig =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if config.log_level.is_empty() {
            config.log_level = "info".to_string();
        }
        Ok(config)
    }

    /// Load a configuration file, failing on any error
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(path, &content)
    }

    /// Load with the explicit path → default path → defaults fallback chain
    pub fn load_with_fallback(explicit: Option<&Path>, default_path: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            tracing::debug!("Loading config from {}", path.display());
            return Self::load(path);
        }

        match std::fs::metadata(default_path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                tracing::debug!("Loading config from {}", default_path.display());
                Self::load(default_path)
            }
            _ => {
                tracing::debug!(
                    "No config at {}, using built-in defaults",
                    default_path.display()
                );
                Ok(Self::default())
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(version) = &overrides.k0s_version {
            self.k0s.version = version.clone();
        }
        if let Some(version) = &overrides.k0rdent_version {
            self.k0rdent.version = version.clone();
        }
        if overrides.debug {
            self.debug = true;
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the configuration as YAML (mode 0600), creating parent directories
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content = self.to_yaml()?;
        write_private_file(path, content.as_bytes()).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.k0s.api.port == 0 {
            errors.push("k0s.api.port must be between 1 and 65535".to_string());
        }
        if self.k0rdent.version.trim().is_empty() {
            errors.push("k0rdent.version is required".to_string());
        }
        if self.k0rdent.helm.chart.trim().is_empty() {
            errors.push("k0rdent.helm.chart is required".to_string());
        }
        if self.k0rdent.helm.namespace.trim().is_empty() {
            errors.push("k0rdent.helm.namespace is required".to_string());
        }
        if !matches!(
            self.log_level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            errors.push(format!("logLevel '{}' is not a valid level", self.log_level));
        }
        errors.extend(self.k0rdent.credentials.validation_errors());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

/// Write `data` to `path` with owner-only permissions
pub fn write_private_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
