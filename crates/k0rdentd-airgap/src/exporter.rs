//! Worker node artifacts for joining an air-gapped cluster
//!
//! The export carries the k0s binary and scripts but only a reference to
//! the enterprise bundle, which is not redistributed.

use crate::assets::{Asset, write_executable};
use crate::containerd::{CONTAINERD_DROP_IN_DIR, MIRRORED_REGISTRIES};
use crate::error::{AirgapError, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_EXPORT_DIR: &str = "./worker-bundle";
const BUNDLE_DOWNLOAD_URL: &str = "https://get.mirantis.com/k0rdent-enterprise/";

pub struct WorkerExporter {
    bundle_path: PathBuf,
    registry: String,
}

impl WorkerExporter {
    /// `registry` is the controller's registry address as workers reach it
    pub fn new(bundle_path: impl Into<PathBuf>, registry: impl Into<String>) -> Self {
        Self {
            bundle_path: bundle_path.into(),
            registry: registry.into(),
        }
    }

    /// Export using the k0s binary embedded in this build
    pub fn export(&self, output: &Path) -> Result<Vec<PathBuf>> {
        let k0s = Asset::K0s.bytes().ok_or(AirgapError::OnlineBuild)?;
        self.export_with_binary(output, k0s)
    }

    /// Write every artifact under `output`, returning the written paths
    pub fn export_with_binary(&self, output: &Path, k0s: &[u8]) -> Result<Vec<PathBuf>> {
        let binary = output.join("k0s-binary").join("k0s");
        write_executable(&binary, k0s)?;

        let location = output.join("images").join("BUNDLE_LOCATION.txt");
        std::fs::create_dir_all(output.join("images"))?;
        std::fs::write(&location, self.bundle_location())?;

        let script = output.join("scripts").join("install.sh");
        write_executable(&script, self.install_script().as_bytes())?;

        let readme = output.join("README.md");
        std::fs::write(&readme, self.readme())?;

        let written = vec![binary, location, script, readme];
        for path in &written {
            tracing::info!("Wrote {}", path.display());
        }
        Ok(written)
    }

    fn bundle_name(&self) -> String {
        self.bundle_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.bundle_path.display().to_string())
    }

    fn bundle_location(&self) -> String {
        format!(
            "# k0rdent airgap bundle location\n\
             \n\
             BUNDLE_PATH={path}\n\
             \n\
             # The bundle is not part of this export. Download it from\n\
             #   {url}\n\
             # and copy it to the worker next to this directory, or point the\n\
             # worker at the controller registry ({registry}) instead.\n\
             #\n\
             # To import images locally on the worker:\n\
             #   tar -xzf {name} -C /tmp/bundle\n\
             #   for img in /tmp/bundle/*.tar /tmp/bundle/*/*.tar; do k0s ctr images import \"$img\"; done\n",
            path = self.bundle_path.display(),
            url = BUNDLE_DOWNLOAD_URL,
            registry = self.registry,
            name = self.bundle_name(),
        )
    }

    fn install_script(&self) -> String {
        let mut hosts = String::new();
        for registry in MIRRORED_REGISTRIES {
            hosts.push_str(&format!(
                "sudo mkdir -p \"${{CONTAINERD_DIR}}/certs.d/{registry}\"\n\
                 sudo tee \"${{CONTAINERD_DIR}}/certs.d/{registry}/hosts.toml\" >/dev/null <<EOF\n\
                 server = \"https://{registry}\"\n\
                 \n\
                 [host.\"http://${{REGISTRY}}\"]\n\
                 \x20 capabilities = [\"pull\", \"resolve\"]\n\
                 EOF\n",
            ));
        }

        format!(
            r#"#!/bin/bash
# k0rdentd worker installation
set -euo pipefail

BUNDLE_DIR="$(cd "$(dirname "${{BASH_SOURCE[0]}}")/.." && pwd)"
REGISTRY="${{REGISTRY:-{registry}}}"
CONTAINERD_DIR="{containerd_dir}"
TOKEN_FILE="${{1:-}}"

if [ -z "$TOKEN_FILE" ] || [ ! -f "$TOKEN_FILE" ]; then
    echo "usage: $0 <token-file>"
    echo "create one on the controller with: sudo k0s token create --role worker"
    exit 1
fi

echo "[1/3] Installing k0s"
sudo install -m 755 "${{BUNDLE_DIR}}/k0s-binary/k0s" /usr/local/bin/k0s

echo "[2/3] Configuring containerd mirror (${{REGISTRY}})"
sudo mkdir -p "${{CONTAINERD_DIR}}/certs.d"
sudo tee "${{CONTAINERD_DIR}}/cri-registry.toml" >/dev/null <<EOF
version = 2

[plugins."io.containerd.grpc.v1.cri".registry]
config_path = "${{CONTAINERD_DIR}}/certs.d"
EOF
{hosts}
echo "[3/3] Joining the cluster"
sudo k0s install worker --token-file "$TOKEN_FILE"
sudo k0s start

echo "Worker installed. Check status with: sudo k0s status"
"#,
            registry = self.registry,
            containerd_dir = CONTAINERD_DROP_IN_DIR,
            hosts = hosts,
        )
    }

    fn readme(&self) -> String {
        format!(
            "# k0rdentd worker artifacts\n\
             \n\
             Generated {generated} for joining a worker to an air-gapped k0s cluster.\n\
             \n\
             ## Contents\n\
             \n\
             - `k0s-binary/k0s`: k0s binary matching the controller\n\
             - `images/BUNDLE_LOCATION.txt`: where the k0rdent airgap bundle lives\n\
             - `scripts/install.sh`: installs k0s, configures the registry mirror, joins the cluster\n\
             \n\
             ## Quick start\n\
             \n\
             1. On the controller: `sudo k0s token create --role worker > worker.token`\n\
             2. Copy this directory and `worker.token` to the worker\n\
             3. On the worker: `./scripts/install.sh worker.token`\n\
             \n\
             Images are pulled from the controller registry at `{registry}`. Override with\n\
             `REGISTRY=<host:port> ./scripts/install.sh worker.token`.\n\
             \n\
             ## Bundle\n\
             \n\
             The k0rdent enterprise bundle (`{bundle}`) is not included. Download it from\n\
             {url} if the worker must import images itself.\n",
            generated = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            registry = self.registry,
            bundle = self.bundle_path.display(),
            url = BUNDLE_DOWNLOAD_URL,
        )
    }
}
