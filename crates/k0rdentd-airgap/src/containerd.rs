//! containerd registry mirror configuration for k0s

use std::path::{Path, PathBuf};

/// k0s picks up containerd drop-ins from here
pub const CONTAINERD_DROP_IN_DIR: &str = "/etc/k0s/containerd.d";

/// Upstream registries redirected to the local mirror
pub const MIRRORED_REGISTRIES: [&str; 2] = ["registry.k8s.io", "quay.io"];

/// Locations of the mirror configuration files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPaths {
    pub drop_in_dir: PathBuf,
}

impl MirrorPaths {
    pub fn new(drop_in_dir: impl Into<PathBuf>) -> Self {
        Self {
            drop_in_dir: drop_in_dir.into(),
        }
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.drop_in_dir.join("certs.d")
    }

    pub fn cri_registry_config(&self) -> PathBuf {
        self.drop_in_dir.join("cri-registry.toml")
    }

    pub fn hosts_file(&self, registry: &str) -> PathBuf {
        self.certs_dir().join(registry).join("hosts.toml")
    }
}

impl Default for MirrorPaths {
    fn default() -> Self {
        Self::new(CONTAINERD_DROP_IN_DIR)
    }
}

/// CRI plugin drop-in pointing containerd at the hosts directory
pub fn cri_registry_config(certs_dir: &Path) -> String {
    format!(
        "version = 2\n\n[plugins.\"io.containerd.grpc.v1.cri\".registry]\nconfig_path = \"{}\"\n",
        certs_dir.display()
    )
}

/// `hosts.toml` sending pulls for `registry` to the plain-HTTP mirror
pub fn hosts_config(registry: &str, mirror: &str) -> String {
    format!(
        "server = \"https://{}\"\n\n[host.\"http://{}\"]\n  capabilities = [\"pull\", \"resolve\"]\n",
        registry, mirror
    )
}

/// Write the CRI drop-in and one `hosts.toml` per mirrored registry
pub fn setup_mirror(paths: &MirrorPaths, mirror: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(paths.certs_dir())?;
    std::fs::write(
        paths.cri_registry_config(),
        cri_registry_config(&paths.certs_dir()),
    )?;

    for registry in MIRRORED_REGISTRIES {
        let hosts = paths.hosts_file(registry);
        if let Some(parent) = hosts.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&hosts, hosts_config(registry, mirror))?;
        tracing::debug!("Wrote {}", hosts.display());
    }

    tracing::info!("containerd mirror configured for {}", mirror);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_cri_config() {
        assert_eq!(
            cri_registry_config(&MirrorPaths::default().certs_dir()),
            "version = 2\n\n[plugins.\"io.containerd.grpc.v1.cri\".registry]\nconfig_path = \"/etc/k0s/containerd.d/certs.d\"\n"
        );
    }

    #[test]
    fn test_setup_writes_all_files() {
        let dir = tempdir().unwrap();
        let paths = MirrorPaths::new(dir.path().join("containerd.d"));
        setup_mirror(&paths, "localhost:5000").unwrap();

        let cri = std::fs::read_to_string(paths.cri_registry_config()).unwrap();
        assert!(cri.contains(&paths.certs_dir().display().to_string()));

        let quay = std::fs::read_to_string(paths.hosts_file("quay.io")).unwrap();
        assert_eq!(
            quay,
            "server = \"https://quay.io\"\n\n[host.\"http://localhost:5000\"]\n  capabilities = [\"pull\", \"resolve\"]\n"
        );
        assert!(paths.hosts_file("registry.k8s.io").exists());
    }
}
