//! Filesystem locations touched by an installation

use k0rdentd_airgap::{K0S_INSTALL_PATH, MirrorPaths};
use k0rdentd_config::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

/// Generated k0s cluster configuration
pub const K0S_CONFIG_PATH: &str = "/etc/k0s/k0s.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    pub k0s_config: PathBuf,
    pub k0rdentd_config: PathBuf,
    /// Target of the embedded k0s binary in air-gapped installs
    pub k0s_binary: PathBuf,
    pub containerd: MirrorPaths,
}

impl InstallPaths {
    /// Every path rooted under `root`, for tests and staging
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            k0s_config: root.join("etc/k0s/k0s.yaml"),
            k0rdentd_config: root.join("etc/k0rdentd/k0rdentd.yaml"),
            k0s_binary: root.join("usr/local/bin/k0s"),
            containerd: MirrorPaths::new(root.join("etc/k0s/containerd.d")),
        }
    }
}

impl Default for InstallPaths {
    fn default() -> Self {
        Self {
            k0s_config: PathBuf::from(K0S_CONFIG_PATH),
            k0rdentd_config: PathBuf::from(DEFAULT_CONFIG_PATH),
            k0s_binary: PathBuf::from(K0S_INSTALL_PATH),
            containerd: MirrorPaths::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_mirrors_default_layout() {
        let paths = InstallPaths::under("/tmp/stage");
        assert_eq!(paths.k0s_config, PathBuf::from("/tmp/stage/etc/k0s/k0s.yaml"));
        assert_eq!(
            paths.containerd.cri_registry_config(),
            PathBuf::from("/tmp/stage/etc/k0s/containerd.d/cri-registry.toml")
        );
        assert_eq!(InstallPaths::default().k0s_binary, PathBuf::from("/usr/local/bin/k0s"));
    }
}
