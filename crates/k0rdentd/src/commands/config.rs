use crate::utils;
use anyhow::{Context, bail};
use k0rdentd_config::InstallationConfig;
use std::path::Path;

pub fn validate(config: &InstallationConfig) -> anyhow::Result<()> {
    config.validate()?;
    utils::success("Configuration is valid");

    let credentials = config.k0rdent.credentials.definitions();
    if !credentials.is_empty() {
        println!("  {} cloud credential(s) configured", credentials.len());
    }
    Ok(())
}

pub fn show(config: &InstallationConfig) -> anyhow::Result<()> {
    print!("{}", config.to_yaml()?);
    Ok(())
}

pub fn init(output: &Path, dry_run: bool) -> anyhow::Result<()> {
    if output.exists() {
        bail!("{} already exists", output.display());
    }
    if dry_run {
        utils::dry_run_steps(&[format!("Write default configuration to {}", output.display())]);
        return Ok(());
    }

    InstallationConfig::default()
        .write_to(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    utils::success(&format!("Wrote default configuration to {}", output.display()));
    Ok(())
}
