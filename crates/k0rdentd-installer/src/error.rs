//! Installation error types

use crate::phase::Phase;
use k0rdentd_airgap::AirgapError;
use k0rdentd_cloud::{ClusterError, CredentialError};
use k0rdentd_config::ConfigError;
use k0rdentd_runtime::{RuntimeError, WaitError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InstallError {
    /// A fatal failure, tagged with the phase it aborted
    #[error("{phase} failed: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<InstallError>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("cluster API error: {0}")]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Airgap(#[from] AirgapError),

    #[error("failed to render k0s config: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstallError {
    /// The phase a fatal error aborted, if known
    pub fn phase(&self) -> Option<Phase> {
        match self {
            InstallError::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;
