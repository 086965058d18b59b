use crate::utils;
use anyhow::Context;
use colored::Colorize;
use k0rdentd_airgap::K0S_INSTALL_PATH;
use k0rdentd_config::{InstallationConfig, Overrides};
use k0rdentd_installer::{InstallMode, Installer, K0S_CONFIG_PATH, PhaseOutcome};
use k0rdentd_runtime::{CancellationToken, K0sRuntime, SpinnerProgress, Waiter};
use std::sync::Arc;

pub async fn handle(
    mut config: InstallationConfig,
    overrides: Overrides,
    dry_run: bool,
) -> anyhow::Result<()> {
    config.apply_overrides(&overrides);
    config.validate()?;

    let mode = InstallMode::current();
    let binary = match mode {
        InstallMode::Online => "k0s",
        InstallMode::Airgap => K0S_INSTALL_PATH,
    };
    let runtime = Arc::new(K0sRuntime::new(binary, K0S_CONFIG_PATH));

    let cancel = CancellationToken::new();
    let waiter = Waiter::new(Arc::new(SpinnerProgress::new())).cancel_on(cancel.clone());
    let mut installer = Installer::new(config, runtime)
        .with_waiter(waiter)
        .with_mode(mode)
        .dry_run(dry_run);

    if dry_run {
        utils::dry_run_steps(&installer.plan());
        return Ok(());
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling installation");
            cancel.cancel();
        }
    });

    println!(
        "{}",
        format!(
            "Installing k0rdent {} ({} mode)",
            installer.config().k0rdent.version,
            match mode {
                InstallMode::Online => "online",
                InstallMode::Airgap => "air-gapped",
            }
        )
        .bold()
    );

    let report = match installer.run().await {
        Ok(report) => report,
        Err(e) => {
            if let Some(phase) = e.phase() {
                utils::failure(phase.description());
            }
            return Err(e).context("installation failed");
        }
    };

    for (phase, outcome) in &report.phases {
        match outcome {
            PhaseOutcome::Completed => utils::success(phase.description()),
            PhaseOutcome::Skipped(reason) => {
                println!("{} {} ({})", "-".dimmed(), phase.description(), reason.dimmed())
            }
            PhaseOutcome::Warning(message) => {
                utils::warning(&format!("{}: {}", phase.description(), message))
            }
        }
    }

    println!();
    if report.warnings().is_empty() {
        utils::success("k0rdent installed successfully");
    } else {
        utils::warning("k0rdent installed with warnings, see above");
    }
    Ok(())
}
