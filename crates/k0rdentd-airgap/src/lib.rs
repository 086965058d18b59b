//! Air-gapped distribution for k0rdentd
//!
//! The registry daemon brings a signed bundle's images into a local,
//! disk-backed OCI registry that k0s' containerd pulls from:
//!
//! ```text
//! bundle (.tar.gz | dir)
//!   │  SignatureVerifier (cosign verify-blob)
//!   ▼
//! prepare_bundle ─► find_image_archives ─► ImagePusher ──skopeo──► registry (axum + BlobStore)
//!                                           (bounded)                  ▲
//!                                                                      │ pull
//!                                                containerd mirror ────┘
//! ```

pub mod assets;
pub mod bundle;
pub mod containerd;
pub mod daemon;
pub mod error;
pub mod exporter;
pub mod image;
pub mod metadata;
pub mod pusher;
pub mod registry;
pub mod tools;
pub mod verifier;

pub use assets::{Asset, K0S_INSTALL_PATH};
pub use bundle::{CHART_NAME, PreparedBundle, extract_version, find_image_archives, prepare_bundle};
pub use containerd::{MirrorPaths, setup_mirror};
pub use daemon::{DaemonOptions, RegistryDaemon, format_bytes, is_port_in_use, storage_size};
pub use error::{AirgapError, Result};
pub use exporter::WorkerExporter;
pub use image::ImageReference;
pub use metadata::{BuildMetadata, Flavor, is_airgap};
pub use pusher::{DEFAULT_PUSH_CONCURRENCY, ImageCopier, ImagePusher, PushSummary, SkopeoCopier};
pub use verifier::{DEFAULT_COSIGN_KEY, SignatureVerifier};
