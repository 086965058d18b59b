use crate::utils;
use anyhow::{Context, anyhow};
use k0rdentd_airgap::{WorkerExporter, is_airgap};
use k0rdentd_config::InstallationConfig;
use std::path::{Path, PathBuf};

pub fn handle(
    config: &InstallationConfig,
    output: &Path,
    bundle_path: Option<PathBuf>,
    dry_run: bool,
) -> anyhow::Result<()> {
    if !is_airgap() {
        return Err(anyhow!(
            "export-worker-artifacts is only available in the airgap build"
        ));
    }

    let bundle = bundle_path
        .or_else(|| config.airgap.bundle_path.clone())
        .context("no bundle path given; use --bundle-path or set airgap.bundlePath")?;
    let registry = config.airgap.registry_address();

    if dry_run {
        utils::dry_run_steps(&[
            format!("Write k0s binary to {}", output.join("k0s-binary/k0s").display()),
            format!("Reference bundle {} in images/BUNDLE_LOCATION.txt", bundle.display()),
            format!("Write scripts/install.sh using registry {}", registry),
            "Write README.md".to_string(),
        ]);
        return Ok(());
    }

    let written = WorkerExporter::new(&bundle, registry)
        .export(output)
        .context("failed to export worker artifacts")?;
    for path in &written {
        utils::success(&path.display().to_string());
    }
    println!();
    println!(
        "Copy {} to the worker and run scripts/install.sh <token-file>",
        output.display()
    );
    Ok(())
}
