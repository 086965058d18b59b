//! k0s and k0rdent installation
//!
//! ```text
//! ConfigWritten → RuntimeInstalled → RuntimeReady → ApplicationReady
//!               → [ProvidersReady] → CredentialsProvisioned
//! ```
//!
//! Air-gapped installs prepare the bundle version, the embedded k0s binary
//! and the containerd mirror as part of `ConfigWritten`.

pub mod connector;
pub mod error;
pub mod generator;
pub mod installer;
pub mod paths;
pub mod phase;

pub use connector::{ClusterConnector, KubeConnector};
pub use error::{InstallError, Result};
pub use generator::{generate, generate_airgap};
pub use installer::{InstallMode, Installer, Timeouts, provider_release, required_deployments};
pub use paths::{InstallPaths, K0S_CONFIG_PATH};
pub use phase::{FailurePolicy, InstallReport, Phase, PhaseOutcome};
