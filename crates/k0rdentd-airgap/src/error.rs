//! Air-gap error types

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AirgapError {
    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("bundle not found: {}", .0.display())]
    BundleNotFound(PathBuf),

    #[error("unsupported bundle format: {} (expected a directory, .tar.gz or .tgz)", .0.display())]
    UnsupportedBundle(PathBuf),

    #[error("chart not found in bundle")]
    ChartNotFound,

    #[error("version field not found")]
    VersionNotFound,

    #[error("version field is empty")]
    VersionEmpty,

    #[error("image archive {} is not inside bundle root {}", path.display(), root.display())]
    ArchiveOutsideRoot { path: PathBuf, root: PathBuf },

    #[error("signature file not found: {}", .0.display())]
    SignatureMissing(PathBuf),

    #[error("cosign verification failed: {0}")]
    VerificationFailed(String),

    #[error("failed to download cosign key from {url}: {reason}")]
    KeyDownload { url: String, reason: String },

    #[error("failed to push {image}: {reason}")]
    Push { image: String, reason: String },

    #[error("failed to push {failed} out of {total} images")]
    PushFailed { failed: usize, total: usize },

    #[error("port {port} is already in use on {host}")]
    PortInUse { host: String, port: u16 },

    #[error("registry server error: {0}")]
    Server(String),

    #[error("registry did not shut down within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("{0} binary is not embedded in this build")]
    AssetMissing(&'static str),

    #[error("this command requires the airgap build of k0rdentd")]
    OnlineBuild,

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Command(#[from] k0rdentd_runtime::RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AirgapError>;
