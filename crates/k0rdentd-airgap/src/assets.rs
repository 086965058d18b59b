//! Binaries embedded into the air-gap build

use crate::error::{AirgapError, Result};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Where the embedded skopeo binary is installed
pub const SKOPEO_INSTALL_PATH: &str = "/usr/bin/skopeo";
/// Where the embedded k0s binary is installed
pub const K0S_INSTALL_PATH: &str = "/usr/local/bin/k0s";

#[cfg(feature = "airgap")]
static K0S_BINARY: &[u8] = include_bytes!(env!("K0RDENTD_K0S_BINARY"));
#[cfg(feature = "airgap")]
static SKOPEO_BINARY: &[u8] = include_bytes!(env!("K0RDENTD_SKOPEO_BINARY"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    K0s,
    Skopeo,
}

impl Asset {
    pub fn name(&self) -> &'static str {
        match self {
            Asset::K0s => "k0s",
            Asset::Skopeo => "skopeo",
        }
    }

    /// Embedded bytes, `None` in online builds
    pub fn bytes(&self) -> Option<&'static [u8]> {
        #[cfg(feature = "airgap")]
        {
            Some(match self {
                Asset::K0s => K0S_BINARY,
                Asset::Skopeo => SKOPEO_BINARY,
            })
        }
        #[cfg(not(feature = "airgap"))]
        {
            None
        }
    }

    /// Write the embedded binary to `dest` as an executable
    pub fn extract_to(&self, dest: &Path) -> Result<()> {
        let bytes = self.bytes().ok_or(AirgapError::AssetMissing(self.name()))?;
        write_executable(dest, bytes)?;
        tracing::info!("Extracted {} to {}", self.name(), dest.display());
        Ok(())
    }
}

/// Write `data` to `path` with mode 0755, creating parent directories
pub fn write_executable(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // An existing file keeps its mode on truncate
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o755)
        .open(path)?;
    file.write_all(data)?;
    Ok(())
}
