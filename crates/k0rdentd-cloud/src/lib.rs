//! k0rdentd cluster access and credential provisioning
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │               k0rdentd-installer                │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               k0rdentd-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  CredentialsManager::create_all           │   │
//! │  │    secret → identity → credential         │   │
//! │  └──────────────────┬───────────────────────┘   │
//! │  ┌──────────────────▼───────────────────────┐   │
//! │  │  ensure(spec, exists, create)             │   │
//! │  └──────────────────┬───────────────────────┘   │
//! │  ┌──────────────────▼───────────────────────┐   │
//! │  │  trait ClusterApi { ... }                 │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │  KubeCluster  │ │InMemoryCluster│
//! │  (kube-rs)    │ │   (tests)     │
//! └───────────────┘ └───────────────┘
//! ```

pub mod cluster;
pub mod credentials;
pub mod error;
pub mod kubernetes;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod provision;

// Re-exports
pub use cluster::{
    ClusterApi, ClusterObject, HelmReleaseStatus, ObjectKind, ObjectRef, helm_release_secret,
};
pub use credentials::{
    CREDENTIAL_NAMESPACE, CredentialObjects, CredentialOutcome, CredentialStatus,
    CredentialsManager, ProvisionReport,
};
pub use error::{ClusterError, CredentialError, ProvisionError, Result};
pub use kubernetes::KubeCluster;
pub use provision::{Ensured, ResourceSpec, ensure};
