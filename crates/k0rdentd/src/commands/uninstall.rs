use crate::utils;
use anyhow::Context;
use k0rdentd_airgap::K0S_INSTALL_PATH;
use k0rdentd_config::InstallationConfig;
use k0rdentd_installer::{InstallMode, Installer, K0S_CONFIG_PATH};
use k0rdentd_runtime::K0sRuntime;
use std::sync::Arc;

pub async fn handle(dry_run: bool) -> anyhow::Result<()> {
    let binary = match InstallMode::current() {
        InstallMode::Online => "k0s",
        InstallMode::Airgap => K0S_INSTALL_PATH,
    };
    let runtime = Arc::new(K0sRuntime::new(binary, K0S_CONFIG_PATH));
    let installer = Installer::new(InstallationConfig::default(), runtime).dry_run(dry_run);

    if dry_run {
        utils::dry_run_steps(&installer.uninstall_plan());
        return Ok(());
    }

    installer.uninstall().await.context("uninstall failed")?;
    utils::success("k0s and k0rdent uninstalled");
    Ok(())
}
